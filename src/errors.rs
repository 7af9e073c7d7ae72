use thiserror::Error;

/// Errors raised while decoding an instruction header.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error("Syntax error in '{text}': {reason}")]
    Syntax { text: String, reason: String },
    #[error("Instruction not implemented: '{0}'")]
    NotImplemented(String),
}

/// Errors raised by the compile and projection passes.
///
/// None of these are retried; the whole pass is aborted and the caller
/// fixes the template or the data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error(transparent)]
    ParserError(#[from] ParserError),
    #[error("No open instruction for {0}")]
    UnmatchedCloser(String),
    #[error("No closing instruction for {0}")]
    UnclosedInstruction(String),
    #[error("url and text do not match in '{0}'")]
    ContentMismatch(String),
    #[error("Link text not found for '{0}'")]
    MissingLinkText(String),
    #[error("Unsupported marker context for '{instruction}': {reason}")]
    UnsupportedContext { instruction: String, reason: String },
    #[error("Unresolved path '{0}'")]
    UnresolvedPath(String),
    #[error("Path '{0}' does not resolve to an iterable")]
    NotIterable(String),
    #[error("XML error: {0}")]
    Xml(String),
    #[error("Invalid options: {0}")]
    Config(String),
}
