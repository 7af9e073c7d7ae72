#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::{Value, json};

    use crate::core::document::Document;
    use crate::parser::Instruction;
    use crate::{HostData, Template, TemplateError, TemplateOptions, UndefinedPolicy};

    fn init() {
        let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::Trace).try_init();
    }

    const GENSHI: &str = "http://genshi.edgewall.org/";

    fn content(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0" xmlns:table="urn:oasis:names:tc:opendocument:xmlns:table:1.0" xmlns:xlink="http://www.w3.org/1999/xlink"><office:body><office:text>{}</office:text></office:body></office:document-content>"#,
            body
        )
    }

    fn declare(fields: &[(&str, &str)]) -> String {
        let decls: String = fields
            .iter()
            .map(|(name, kind)| {
                format!(r#"<text:user-field-decl office:value-type="{}" text:name="py3o.{}"/>"#, kind, name)
            })
            .collect();
        format!("<text:user-field-decls>{}</text:user-field-decls>", decls)
    }

    fn opener(directive: &str, body: &str) -> String {
        let href = body.replace(' ', "%20");
        format!(
            r#"<text:p><text:a xlink:href="py3o://{}=%22{}%22">{}="{}"</text:a></text:p>"#,
            directive, href, directive, body
        )
    }

    fn closer(directive: &str) -> String {
        format!(r#"<text:p><text:a xlink:href="py3o:///{}">/{}</text:a></text:p>"#, directive, directive)
    }

    fn field(name: &str) -> String {
        format!(r#"<text:p><text:user-field-get text:name="py3o.{}">{}</text:user-field-get></text:p>"#, name, name)
    }

    fn template(body: &str) -> Template {
        Template::from_xml(&[&content(body)], TemplateOptions::default()).unwrap()
    }

    fn invoice() -> Template {
        let row = |cell: &str| format!("<table:table-row><table:table-cell>{}</table:table-cell></table:table-row>", cell);
        let body = [
            declare(&[("document.total", "float"), ("item.InvoiceRef", "string")]),
            field("document.total"),
            format!(
                "<table:table>{}{}{}</table:table>",
                row(&opener("for", "line in items")),
                row("<text:p>line</text:p>"),
                row(&closer("for")),
            ),
            opener("for", "item in items"),
            field("item.InvoiceRef"),
            closer("for"),
            r#"<text:p>Paid: <text:a xlink:href="py3o://if=%22document.paid%22">if="document.paid"</text:a>yes<text:a xlink:href="py3o:///if">/if</text:a>.</text:p>"#.to_string(),
        ]
        .concat();
        template(&body)
    }

    struct Obj {
        val: String,
    }

    impl HostData for Obj {
        fn get_attribute(&self, name: &str) -> Option<&dyn HostData> {
            match name {
                "val" => Some(&self.val as &dyn HostData),
                _ => None,
            }
        }

        fn iterate(&self) -> Option<Vec<&dyn HostData>> {
            None
        }

        fn to_value(&self) -> Value {
            json!({ "val": self.val })
        }
    }

    struct Totals {
        total: i64,
    }

    impl HostData for Totals {
        fn get_attribute(&self, name: &str) -> Option<&dyn HostData> {
            match name {
                "total" => Some(&self.total as &dyn HostData),
                _ => None,
            }
        }

        fn iterate(&self) -> Option<Vec<&dyn HostData>> {
            None
        }

        fn to_value(&self) -> Value {
            json!({ "total": self.total })
        }
    }

    #[test]
    fn test_global_attribute_projection() {
        init();

        let mut template = template(&[declare(&[("document.total", "float")]), field("document.total")].concat());
        let tree = template.compile().unwrap();
        assert_eq!(tree.globals(), &["document.total".to_string()]);

        let mut data = HashMap::new();
        data.insert("document".to_string(), Totals { total: 0 });
        assert_eq!(template.project(&tree, &data).unwrap(), json!({"document": {"total": 0}}));
    }

    #[test]
    fn test_plain_list_projection() {
        init();

        let body = [opener("for", "v in my2list"), "<text:p>value</text:p>".to_string(), closer("for")].concat();
        let mut template = template(&body);
        let tree = template.compile().unwrap();

        let projected = template.project(&tree, &json!({"my2list": ["val1", "val2"]})).unwrap();
        assert_eq!(projected, json!({"my2list": ["val1", "val2"]}));
    }

    #[test]
    fn test_object_list_projection() {
        init();

        let body = [declare(&[("v.val", "string")]), opener("for", "v in my3list"), field("v.val"), closer("for")].concat();
        let mut template = template(&body);
        let tree = template.compile().unwrap();

        let mut data = HashMap::new();
        data.insert("my3list".to_string(), vec![Obj { val: "val1".into() }, Obj { val: "val2".into() }]);
        let projected = template.project(&tree, &data).unwrap();
        assert_eq!(projected, json!({"my3list": [{"val": "val1"}, {"val": "val2"}]}));
    }

    #[test]
    fn test_content_mismatch() {
        init();

        let body = [
            r#"<text:p><text:a xlink:href="py3o://for=%22line%20in%20items%22">for="x in y"</text:a></text:p>"#.to_string(),
            closer("for"),
        ]
        .concat();
        let mut template = template(&body);
        let err = template.compile().unwrap_err();
        assert_eq!(err, TemplateError::ContentMismatch("for=\"x in y\"".into()));
        assert_eq!(err.to_string(), "url and text do not match in 'for=\"x in y\"'");
    }

    #[test]
    fn test_unmatched_closer() {
        init();

        let body = [opener("for", "a in b"), closer("for"), closer("for")].concat();
        let mut template = template(&body);
        let err = template.compile().unwrap_err();
        assert_eq!(err, TemplateError::UnmatchedCloser("/for".into()));
        assert_eq!(template.errors(), &[err]);
    }

    #[test]
    fn test_introspection() {
        init();

        let template = invoice();
        assert_eq!(
            template.user_instructions(),
            vec!["for=\"line in items\"", "/for", "for=\"item in items\"", "/for", "if=\"document.paid\"", "/if"]
        );
        assert_eq!(template.user_variables(), vec!["document.total", "item.InvoiceRef"]);

        let mapping = template.instructions_mapping().unwrap();
        let expected: Vec<(String, String)> =
            vec![("item".into(), "items".into()), ("line".into(), "items".into())];
        assert_eq!(mapping.into_iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_duplicate_loops_in_tree() {
        init();

        let tree = invoice().loop_tree().unwrap();
        assert_eq!(tree.globals(), &["document.total".to_string()]);
        assert_eq!(tree.roots().len(), 2);

        let first = tree.scope(tree.roots()[0]);
        let second = tree.scope(tree.roots()[1]);
        assert_eq!((first.name.as_str(), first.var_from.as_str()), ("items", "line"));
        assert_eq!((second.name.as_str(), second.var_from.as_str()), ("items", "item"));
        assert!(first.attributes().is_empty());
        assert_eq!(second.attributes(), &["item.InvoiceRef".to_string()]);
    }

    #[test]
    fn test_compile_invoice() {
        init();

        let mut template = invoice();
        let tree = template.compile().unwrap();
        let documents = template.documents();
        let document = &documents[0];

        let scopes = document.scopes();
        assert_eq!(scopes.len(), 3);
        assert!(matches!(scopes[0].1, Instruction::Loop { header, .. } if header == "line in items"));
        assert!(matches!(scopes[2].1, Instruction::Conditional { expression } if expression == "document.paid"));

        let table = document.parent(scopes[0].0).unwrap();
        assert_eq!(document.name(table).local, "table");
        assert_eq!(document.children(table).len(), 1);
        assert_eq!(document.attribute(scopes[1].0, GENSHI, "for"), Some("item in items"));
        assert_eq!(document.tail(scopes[2].0), Some("."));

        let xml = document.to_xml();
        assert!(!xml.contains("py3o://"));
        assert!(xml.contains(r#"py:content="format_float(document.total)""#));
        assert!(xml.contains(r#"py:content="item.InvoiceRef""#));
        assert!(Document::parse(&xml).is_ok());

        let data = json!({
            "document": {"total": 12.5, "paid": true},
            "items": [{"InvoiceRef": "A", "Amount": 1}, {"InvoiceRef": "B", "Amount": 2}]
        });
        assert_eq!(
            template.project(&tree, &data).unwrap(),
            json!({
                "document": {"total": 12.5},
                "items": [{"InvoiceRef": "A", "Amount": 1}, {"InvoiceRef": "B", "Amount": 2}]
            })
        );
    }

    #[test]
    fn test_empty_list_projection() {
        init();

        let body = [declare(&[("row.key", "string")]), opener("for", "row in key"), field("row.key"), closer("for")].concat();
        let mut template = template(&body);
        let tree = template.compile().unwrap();
        assert_eq!(template.project(&tree, &json!({"key": []})).unwrap(), json!({"key": []}));
    }

    #[test]
    fn test_nested_loops() {
        init();

        let body = [
            declare(&[("group.label", "string"), ("line.name", "string")]),
            opener("for", "group in order.groups"),
            field("group.label"),
            opener("for", "line in group.lines"),
            field("line.name"),
            closer("for"),
            closer("for"),
        ]
        .concat();
        let mut template = template(&body);
        let tree = template.compile().unwrap();

        let outer = tree.roots()[0];
        assert_eq!(tree.scope(outer).children().len(), 1);

        let document = &template.documents()[0];
        let scopes = document.scopes();
        assert_eq!(scopes.len(), 2);
        assert!(document.is_ancestor(scopes[0].0, scopes[1].0));

        let data = json!({"order": {"groups": [
            {"label": "first", "lines": [{"name": "a"}, {"name": "b"}]},
            {"label": "second", "lines": []}
        ]}});
        assert_eq!(
            template.project(&tree, &data).unwrap(),
            json!({"order": {"groups": [
                {"label": "first", "lines": [{"name": "a"}, {"name": "b"}]},
                {"label": "second", "lines": []}
            ]}})
        );
    }

    #[test]
    fn test_sibling_loop_after_closed_loop() {
        init();

        let body = [
            opener("for", "document in documents"),
            "<text:p>doc</text:p>".to_string(),
            closer("for"),
            opener("for", "item in document.items"),
            "<text:p>item</text:p>".to_string(),
            closer("for"),
        ]
        .concat();
        let mut template = template(&body);
        let tree = template.compile().unwrap();
        assert_eq!(tree.roots().len(), 2);

        let data = json!({"documents": [{"items": ["x"]}], "document": {"items": ["a", "b"]}});
        assert_eq!(
            template.project(&tree, &data).unwrap(),
            json!({"documents": [{"items": ["x"]}], "document": {"items": ["a", "b"]}})
        );
    }

    #[test]
    fn test_fields_attach_to_the_loop_around_them() {
        init();

        let body = [
            declare(&[("line.amount", "float")]),
            opener("for", "line in items"),
            "<text:p>x</text:p>".to_string(),
            closer("for"),
            opener("for", "line in others"),
            field("line.amount"),
            closer("for"),
        ]
        .concat();
        let mut template = template(&body);
        let tree = template.compile().unwrap();

        let data = json!({"items": [{"a": 1}], "others": [{"amount": 2, "b": 3}]});
        assert_eq!(
            template.project(&tree, &data).unwrap(),
            json!({"items": [{"a": 1}], "others": [{"amount": 2}]})
        );
    }

    #[test]
    fn test_pair_target_loop_still_compiles() {
        init();

        let body = [opener("for", "k, v in pairs"), "<text:p>row</text:p>".to_string(), closer("for")].concat();
        let mut template = template(&body);
        assert_eq!(template.user_instructions(), vec!["for=\"k, v in pairs\"", "/for"]);
        assert!(template.instructions_mapping().unwrap().is_empty());

        let tree = template.compile().unwrap();
        assert!(tree.is_empty());

        let document = &template.documents()[0];
        let scopes = document.scopes();
        assert_eq!(scopes.len(), 1);
        assert_eq!(document.attribute(scopes[0].0, GENSHI, "for"), Some("k, v in pairs"));
        assert!(!document.to_xml().contains("py3o://"));
    }

    #[test]
    fn test_lenient_options() {
        init();

        let options = TemplateOptions::from_json(r#"{"undefined": "lenient"}"#).unwrap();
        assert_eq!(options.undefined, UndefinedPolicy::Lenient);
        assert_eq!(options.marker_scheme, "py3o://");

        let body = [declare(&[("item.name", "string"), ("title", "string")]), opener("for", "item in items"), field("item.name"), closer("for")].concat();
        let mut template = Template::from_xml(&[&content(&body)], options).unwrap();
        let tree = template.compile().unwrap();
        assert_eq!(
            template.project(&tree, &json!({"items": [{}]})).unwrap(),
            json!({"title": "", "items": [{"name": ""}]})
        );

        let empty = template.project(&tree, &json!({})).map_err(|e| e.to_string());
        assert_eq!(empty, Ok(json!({"title": "", "items": []})));
    }

    #[test]
    fn test_strict_projection_names_path() {
        init();

        let body = [declare(&[("item.name", "string")]), opener("for", "item in items"), field("item.name"), closer("for")].concat();
        let mut template = template(&body);
        let tree = template.compile().unwrap();
        let err = template.project(&tree, &json!({"items": [{"other": 1}]})).unwrap_err();
        assert_eq!(err, TemplateError::UnresolvedPath("item.name".into()));
    }

    #[test]
    fn test_bad_header_leaves_documents_untouched() {
        init();

        let body = [
            r#"<text:p><text:a xlink:href="py3o://for=%22i%20in%20a..b%22">for="i in a..b"</text:a></text:p>"#.to_string(),
            closer("for"),
        ]
        .concat();
        let mut template = template(&body);
        let before = template.documents()[0].to_xml();
        let err = template.compile().unwrap_err();
        assert!(matches!(err, TemplateError::ParserError(crate::ParserError::Syntax { .. })));
        assert_eq!(template.documents()[0].to_xml(), before);
    }

    #[test]
    fn test_custom_marker_scheme() {
        init();

        let body = r#"<text:p><text:a xlink:href="report://if=%22x%22">if="x"</text:a></text:p><text:p>shown</text:p><text:p><text:a xlink:href="report:///if">/if</text:a></text:p>"#;
        let mut options = TemplateOptions::default();
        options.set_marker_scheme("report://").set_engine_namespace("tpl", "urn:engine");
        let mut template = Template::from_xml(&[&content(body)], options.build()).unwrap();
        template.compile().unwrap();

        let xml = template.documents()[0].to_xml();
        assert!(xml.contains(r#"<span xmlns:tpl="urn:engine" tpl:strip="True" tpl:if="x">"#));
    }

    #[test]
    fn test_renew_list_ids() {
        init();

        let body = r#"<text:list xml:id="list1"><text:list-item><text:p>a</text:p></text:list-item></text:list><text:list xml:id="list1"/>"#;
        let mut template = template(body);
        assert_eq!(template.renew_list_ids(), 2);

        let xml = template.documents()[0].to_xml();
        assert!(!xml.contains(r#"xml:id="list1""#));
        assert_eq!(xml.matches("xml:id=\"list").count(), 2);
    }
}
