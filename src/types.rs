use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

/// Read access to caller-owned data.
///
/// The projector only ever asks two things of a host value: "give me the
/// attribute called `name`" and "give me your elements in order". Leaf
/// values are finally turned into plain JSON through `to_value`.
pub trait HostData {
    fn get_attribute(&self, name: &str) -> Option<&dyn HostData>;

    /// Elements in enumeration order, or `None` when the value is not enumerable.
    fn iterate(&self) -> Option<Vec<&dyn HostData>>;

    fn to_value(&self) -> Value;
}

impl HostData for Value {
    fn get_attribute(&self, name: &str) -> Option<&dyn HostData> {
        match self {
            Value::Object(map) => map.get(name).map(|v| v as &dyn HostData),
            _ => None,
        }
    }

    fn iterate(&self) -> Option<Vec<&dyn HostData>> {
        match self {
            Value::Array(values) => Some(values.iter().map(|v| v as &dyn HostData).collect()),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        self.clone()
    }
}

// Macro to generate leaf impls for scalar types
macro_rules! impl_host_data_scalar {
    ($($type:ty),*) => {
        $(
            impl HostData for $type {
                fn get_attribute(&self, _name: &str) -> Option<&dyn HostData> {
                    None
                }

                fn iterate(&self) -> Option<Vec<&dyn HostData>> {
                    None
                }

                fn to_value(&self) -> Value {
                    Value::from(self.clone())
                }
            }
        )*
    };
}

impl_host_data_scalar!(String, bool, i32, i64, u32, u64, f64);

impl<T: HostData> HostData for Vec<T> {
    fn get_attribute(&self, _name: &str) -> Option<&dyn HostData> {
        None
    }

    fn iterate(&self) -> Option<Vec<&dyn HostData>> {
        Some(self.iter().map(|v| v as &dyn HostData).collect())
    }

    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(HostData::to_value).collect())
    }
}

impl<T: HostData> HostData for Option<T> {
    fn get_attribute(&self, name: &str) -> Option<&dyn HostData> {
        self.as_ref().and_then(|v| v.get_attribute(name))
    }

    fn iterate(&self) -> Option<Vec<&dyn HostData>> {
        self.as_ref().and_then(HostData::iterate)
    }

    fn to_value(&self) -> Value {
        self.as_ref().map(HostData::to_value).unwrap_or(Value::Null)
    }
}

impl<T: HostData + ?Sized> HostData for Box<T> {
    fn get_attribute(&self, name: &str) -> Option<&dyn HostData> {
        (**self).get_attribute(name)
    }

    fn iterate(&self) -> Option<Vec<&dyn HostData>> {
        (**self).iterate()
    }

    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

macro_rules! impl_host_data_map {
    ($map:ident) => {
        impl<T: HostData> HostData for $map<String, T> {
            fn get_attribute(&self, name: &str) -> Option<&dyn HostData> {
                self.get(name).map(|v| v as &dyn HostData)
            }

            fn iterate(&self) -> Option<Vec<&dyn HostData>> {
                None
            }

            fn to_value(&self) -> Value {
                Value::Object(self.iter().map(|(k, v)| (k.clone(), v.to_value())).collect())
            }
        }
    };
}

impl_host_data_map!(HashMap);
impl_host_data_map!(BTreeMap);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_objects_expose_attributes() {
        let data = json!({"document": {"total": 0}});
        let document = data.get_attribute("document").unwrap();
        assert_eq!(document.get_attribute("total").unwrap().to_value(), json!(0));
        assert!(document.get_attribute("missing").is_none());
        assert!(document.iterate().is_none());
    }

    #[test]
    fn vectors_iterate_in_order() {
        let list = vec!["a".to_string(), "b".to_string()];
        let values: Vec<Value> = list.iterate().unwrap().iter().map(|v| v.to_value()).collect();
        assert_eq!(values, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn maps_are_attribute_bags() {
        let mut map: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        map.insert("numbers".into(), vec![1, 2]);
        assert_eq!(map.get_attribute("numbers").unwrap().to_value(), json!([1, 2]));
        assert_eq!(map.to_value(), json!({"numbers": [1, 2]}));
    }
}
