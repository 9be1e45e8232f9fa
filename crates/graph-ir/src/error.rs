// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for IR construction and verification.

/// Errors that can occur when building or verifying graph IR.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A function, value, or constant name is used twice.
    #[error("duplicate name '{name}' in function '{function}'")]
    DuplicateName { function: String, name: String },

    /// A node references a value that nothing produces.
    #[error("unknown value '{value}' consumed by node '{node}' in function '{function}'")]
    UnknownValue {
        function: String,
        node: String,
        value: String,
    },

    /// Operand element kinds or full types disagree.
    #[error("type mismatch at node '{node}' in function '{function}': {detail}")]
    TypeMismatch {
        function: String,
        node: String,
        detail: String,
    },

    /// Operand dimensions disagree.
    #[error("shape mismatch at node '{node}' in function '{function}': {detail}")]
    ShapeMismatch {
        function: String,
        node: String,
        detail: String,
    },

    /// A node is malformed (operand counts, missing attributes, ...).
    #[error("invalid node '{node}' in function '{function}': {detail}")]
    InvalidNode {
        function: String,
        node: String,
        detail: String,
    },

    /// A required integer attribute is missing.
    #[error("node '{node}' is missing attribute '{attr}'")]
    MissingAttr { node: String, attr: String },

    /// The graph is structurally malformed.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
}
