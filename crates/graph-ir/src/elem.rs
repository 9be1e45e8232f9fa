// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor element kinds.
//!
//! `ElemKind` is a closed enumeration: backends match on it exhaustively,
//! so adding a variant is a breaking change that every support gate must
//! answer for.

/// The cell type of a tensor.
///
/// `*Q` variants carry an affine quantization (scale, zero point) in their
/// containing [`crate::TensorTy`]; `*I` variants are plain integers. The
/// fused variant packs per-row scale/offset metadata inline with the data,
/// so its descriptor carries no quantization parameters of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum ElemKind {
    /// 32-bit IEEE 754 floating point.
    Float,
    /// 8-bit signed quantized integer.
    Int8Q,
    /// 16-bit signed quantized integer.
    Int16Q,
    /// 32-bit signed quantized integer (bias tensors, mostly).
    Int32Q,
    /// 32-bit signed index/plain integer.
    Int32I,
    /// 64-bit signed index/plain integer.
    Int64I,
    /// 8-bit unsigned quantized integer.
    UInt8Q,
    /// 8-bit unsigned quantized integer with per-row scale/offset fused
    /// into each row of the payload.
    UInt8FusedQ,
    /// Boolean.
    Bool,
}

impl ElemKind {
    /// Returns the size of a single element in bytes.
    ///
    /// For [`ElemKind::UInt8FusedQ`] this is the data cell only; the
    /// per-row footer is accounted for by [`crate::TensorTy::size_bytes`].
    pub fn size_bytes(self) -> usize {
        match self {
            ElemKind::Float => 4,
            ElemKind::Int8Q => 1,
            ElemKind::Int16Q => 2,
            ElemKind::Int32Q => 4,
            ElemKind::Int32I => 4,
            ElemKind::Int64I => 8,
            ElemKind::UInt8Q => 1,
            ElemKind::UInt8FusedQ => 1,
            ElemKind::Bool => 1,
        }
    }

    /// Returns `true` for kinds that carry an affine quantization.
    pub fn is_quantized(self) -> bool {
        matches!(
            self,
            ElemKind::Int8Q
                | ElemKind::Int16Q
                | ElemKind::Int32Q
                | ElemKind::UInt8Q
                | ElemKind::UInt8FusedQ
        )
    }

    /// Returns `true` for kinds whose quantization metadata lives inline
    /// with the payload rather than in the type descriptor.
    pub fn is_fused_quantized(self) -> bool {
        matches!(self, ElemKind::UInt8FusedQ)
    }

    /// Returns `true` for plain (non-quantized) index integer kinds.
    pub fn is_index(self) -> bool {
        matches!(self, ElemKind::Int32I | ElemKind::Int64I)
    }

    /// Returns a human-readable label for this element kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ElemKind::Float => "float",
            ElemKind::Int8Q => "i8q",
            ElemKind::Int16Q => "i16q",
            ElemKind::Int32Q => "i32q",
            ElemKind::Int32I => "i32",
            ElemKind::Int64I => "i64",
            ElemKind::UInt8Q => "u8q",
            ElemKind::UInt8FusedQ => "u8fusedq",
            ElemKind::Bool => "bool",
        }
    }
}

impl std::fmt::Display for ElemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_bytes() {
        assert_eq!(ElemKind::Float.size_bytes(), 4);
        assert_eq!(ElemKind::Int8Q.size_bytes(), 1);
        assert_eq!(ElemKind::Int16Q.size_bytes(), 2);
        assert_eq!(ElemKind::Int64I.size_bytes(), 8);
        assert_eq!(ElemKind::Bool.size_bytes(), 1);
    }

    #[test]
    fn test_quantized_predicates() {
        assert!(ElemKind::Int8Q.is_quantized());
        assert!(ElemKind::UInt8FusedQ.is_quantized());
        assert!(ElemKind::UInt8FusedQ.is_fused_quantized());
        assert!(!ElemKind::Int8Q.is_fused_quantized());
        assert!(!ElemKind::Float.is_quantized());
        assert!(!ElemKind::Int32I.is_quantized());
    }

    #[test]
    fn test_index_kinds() {
        assert!(ElemKind::Int32I.is_index());
        assert!(ElemKind::Int64I.is_index());
        assert!(!ElemKind::Int32Q.is_index());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ElemKind::Float), "float");
        assert_eq!(format!("{}", ElemKind::UInt8FusedQ), "u8fusedq");
    }

    #[test]
    fn test_serde_roundtrip() {
        let json = serde_json::to_string(&ElemKind::Int16Q).unwrap();
        let back: ElemKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ElemKind::Int16Q);
    }
}
