//! Patient scripts and the dialog generator that walks them

mod generator;
mod script;

pub use generator::{
    DialogGenerator, DialogMessages, Reply, ReplyKind, RetrievalDialog, SequentialDialog,
};
pub use script::{QaPair, Script};

/// Collection name of a session's question index
pub const DIALOG_COLLECTION: &str = "dialog_questions";
