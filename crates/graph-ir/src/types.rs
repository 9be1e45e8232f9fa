// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor shapes and full type descriptors.
//!
//! A [`TensorTy`] pairs an [`ElemKind`] with a [`Shape`] and, for the
//! quantized kinds, the affine quantization parameters. Two tensor types
//! compare equal only when all of these agree, which is exactly the
//! comparison the verifier and the support gate rely on.

use crate::ElemKind;

/// Number of footer bytes fused into each row of a `UInt8FusedQ` tensor:
/// an `f32` scale followed by an `i32` offset.
const FUSED_ROW_FOOTER_BYTES: usize = 8;

/// The dimensions of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Creates a shape from explicit dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Self(dims)
    }

    /// Creates a rank-1 shape.
    pub fn vector(n: usize) -> Self {
        Self(vec![n])
    }

    /// Creates a rank-2 shape.
    pub fn matrix(rows: usize, cols: usize) -> Self {
        Self(vec![rows, cols])
    }

    /// Returns the dimensions.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Returns the number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Returns the total number of elements.
    pub fn num_elements(&self) -> usize {
        self.0.iter().product()
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " x ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

/// A full tensor type descriptor: element kind, shape, and quantization.
///
/// `scale`/`offset` are only meaningful when `elem.is_quantized()` and the
/// kind is not fused; fused kinds store per-row parameters inline with the
/// payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TensorTy {
    pub elem: ElemKind,
    pub shape: Shape,
    /// Quantization scale; `1.0` for non-quantized kinds.
    pub scale: f32,
    /// Quantization zero point; `0` for non-quantized kinds.
    pub offset: i32,
}

impl TensorTy {
    /// Creates a non-quantized tensor type.
    ///
    /// Also used for fused kinds, whose quantization lives in the payload.
    pub fn new(elem: ElemKind, shape: Shape) -> Self {
        Self {
            elem,
            shape,
            scale: 1.0,
            offset: 0,
        }
    }

    /// Creates a quantized tensor type with explicit scale and zero point.
    pub fn quantized(elem: ElemKind, shape: Shape, scale: f32, offset: i32) -> Self {
        Self {
            elem,
            shape,
            scale,
            offset,
        }
    }

    /// Returns `true` if the element kind is quantized.
    pub fn is_quantized(&self) -> bool {
        self.elem.is_quantized()
    }

    /// Returns the payload size in bytes, including the per-row footer of
    /// fused kinds.
    pub fn size_bytes(&self) -> usize {
        let data = self.shape.num_elements() * self.elem.size_bytes();
        if self.elem.is_fused_quantized() {
            let rows = self.shape.dims().first().copied().unwrap_or(0);
            data + rows * FUSED_ROW_FOOTER_BYTES
        } else {
            data
        }
    }

    /// Returns `true` if `other` has the same element kind and dimensions,
    /// ignoring quantization parameters.
    pub fn same_elem_and_dims(&self, other: &TensorTy) -> bool {
        self.elem == other.elem && self.shape == other.shape
    }
}

impl std::fmt::Display for TensorTy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.elem.is_quantized() && !self.elem.is_fused_quantized() {
            write!(
                f,
                "{}{}(s={}, o={})",
                self.elem, self.shape, self.scale, self.offset
            )
        } else {
            write!(f, "{}{}", self.elem, self.shape)
        }
    }
}
