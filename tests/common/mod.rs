//! Common fixtures for integration tests

#![allow(dead_code)]

use origraph::model::{NetworkModel, StaticTableOptions};
use origraph::{ClassHandle, TableHandle};
use serde_json::{json, Value};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Static table over `rows`, without a class conversion
pub fn static_table(model: &NetworkModel, name: &str, rows: Value) -> TableHandle {
    model
        .add_static_table(StaticTableOptions {
            name: name.to_string(),
            data: rows,
            attributes: vec![],
        })
        .and_then(|class| class.table())
        .expect("Failed to create static table")
}

/// Node class over a keyed table
pub fn node_class(model: &NetworkModel, name: &str, rows: Value) -> ClassHandle {
    model
        .add_static_table(StaticTableOptions {
            name: name.to_string(),
            data: rows,
            attributes: vec![],
        })
        .and_then(|class| class.interpret_as_nodes())
        .expect("Failed to create node class")
}

/// `{cat, v}` rows: a=1, a=3, b=5
pub fn scores(model: &NetworkModel) -> TableHandle {
    static_table(
        model,
        "scores",
        json!([
            {"cat": "a", "v": 1},
            {"cat": "a", "v": 3},
            {"cat": "b", "v": 5},
        ]),
    )
}

/// Authors and books, keyed by name, with a `written_by` attribute on books
pub fn library(model: &NetworkModel) -> (ClassHandle, ClassHandle) {
    let authors = node_class(
        model,
        "authors",
        json!({
            "ada": {"born": 1815},
            "grace": {"born": 1906},
        }),
    );
    let books = node_class(
        model,
        "books",
        json!({
            "notes": {"written_by": "ada"},
            "compilers": {"written_by": "grace"},
            "cobol": {"written_by": "grace"},
        }),
    );
    (authors, books)
}
