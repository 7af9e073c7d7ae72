pub mod document;
pub mod fields;
pub mod looptree;
pub mod markers;
