// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for backend creation, verification, and compilation.

/// Errors that can occur inside a backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No backend is registered under the requested name.
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    /// A node the backend does not admit was found during verification.
    #[error("unsupported node '{node}' ({kind}) in function '{function}'")]
    UnsupportedNode {
        function: String,
        node: String,
        kind: String,
    },

    /// The function failed IR verification.
    #[error("verification of '{function}' failed: {source}")]
    Verify {
        function: String,
        #[source]
        source: graph_ir::GraphError,
    },

    /// Compilation failed.
    #[error("failed to compile '{function}': {detail}")]
    Compile { function: String, detail: String },

    /// Execution of a compiled artifact failed.
    #[error("execution of '{function}' failed: {detail}")]
    Execute { function: String, detail: String },
}
