//! Bindless index record packing.
//!
//! The packed record is the one wire format this crate owns: a fixed
//! sequence of 32-bit unsigned integers in declared field order, consumed as
//! opaque bytes by device-side code. The layout is an explicit, versioned
//! schema (a named, ordered field list serialized by a builder), never a
//! side effect of struct memory layout.
//!
//! Delivery is either inline (push constants, no GPU buffer round-trip) or
//! via a staged buffer whose GPU address is split into a 32-bit low part
//! plus a shared high part. The split keeps the per-dispatch payload small;
//! it is an optimization, not a correctness requirement, and both paths
//! produce byte-identical records.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use crate::bindless::DescriptorIndex;

/// Width of a record field. All fields are currently 32-bit.
pub const FIELD_WIDTH: usize = 4;

/// A named field in a record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordField {
    /// Field name, for diagnostics and builder validation.
    pub name: &'static str,
}

/// An explicit, versioned record schema.
///
/// Field order in the schema *is* the byte order on the wire; device-side
/// code declares the same ordered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    /// Schema name.
    pub name: &'static str,
    /// Schema version; bump on any field change.
    pub version: u16,
    /// Ordered field list.
    pub fields: &'static [RecordField],
}

impl RecordLayout {
    /// Total serialized size in bytes.
    pub const fn size_bytes(&self) -> usize {
        self.fields.len() * FIELD_WIDTH
    }
}

/// A packed record ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    bytes: Vec<u8>,
}

impl IndexRecord {
    /// The packed bytes, little-endian, in declared field order.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the record in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Serializes field values against a [`RecordLayout`].
///
/// Values must be pushed in declared field order; [`build`](Self::build)
/// asserts the count matches the schema. Building twice from identical
/// inputs yields byte-identical output.
pub struct RecordBuilder {
    layout: &'static RecordLayout,
    values: Vec<u32>,
}

impl RecordBuilder {
    /// Start building a record for the given layout.
    pub fn new(layout: &'static RecordLayout) -> Self {
        Self {
            layout,
            values: Vec::with_capacity(layout.fields.len()),
        }
    }

    /// Append the next field's value as a descriptor index.
    ///
    /// # Panics
    ///
    /// Panics if the index is the invalid sentinel (records must never
    /// carry an unallocated index) or if more values are pushed than the
    /// layout declares.
    pub fn push_index(self, index: DescriptorIndex) -> Self {
        assert!(
            index.is_valid(),
            "cannot pack an invalid descriptor index into record '{}'",
            self.layout.name
        );
        self.push_value(index.get())
    }

    /// Append the next field's value as a raw 32-bit integer.
    ///
    /// # Panics
    ///
    /// Panics if more values are pushed than the layout declares.
    pub fn push_value(mut self, value: u32) -> Self {
        assert!(
            self.values.len() < self.layout.fields.len(),
            "record '{}' v{} has only {} fields",
            self.layout.name,
            self.layout.version,
            self.layout.fields.len()
        );
        self.values.push(value);
        self
    }

    /// Serialize the record.
    ///
    /// # Panics
    ///
    /// Panics if fewer values were pushed than the layout declares.
    pub fn build(self) -> IndexRecord {
        assert_eq!(
            self.values.len(),
            self.layout.fields.len(),
            "record '{}' v{} expects {} fields, got {}",
            self.layout.name,
            self.layout.version,
            self.layout.fields.len(),
            self.values.len()
        );

        let mut bytes = Vec::with_capacity(self.layout.size_bytes());
        for value in &self.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        IndexRecord { bytes }
    }
}

/// The record consumed by the image filter dispatch.
///
/// Field order and width are a contract with the compute kernel; the kernel
/// declares the same three 32-bit fields in the same order.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct FilterIndices {
    /// Mixed-table index of the sampled source texture.
    pub tex_in: u32,
    /// Mixed-table index of the storage result image.
    pub tex_out: u32,
    /// Sampler-table index of the filter sampler.
    pub smp_linear: u32,
}

/// Schema for [`FilterIndices`].
pub const FILTER_INDICES_LAYOUT: RecordLayout = RecordLayout {
    name: "filter_indices",
    version: 1,
    fields: &[
        RecordField { name: "tex_in" },
        RecordField { name: "tex_out" },
        RecordField { name: "smp_linear" },
    ],
};

const_assert_eq!(
    std::mem::size_of::<FilterIndices>(),
    FILTER_INDICES_LAYOUT.size_bytes()
);

impl FilterIndices {
    /// Pack into an [`IndexRecord`] through the schema builder.
    pub fn to_record(self) -> IndexRecord {
        RecordBuilder::new(&FILTER_INDICES_LAYOUT)
            .push_value(self.tex_in)
            .push_value(self.tex_out)
            .push_value(self.smp_linear)
            .build()
    }
}

/// Split a GPU virtual address into a 32-bit low part and a shared high
/// part.
///
/// When the record travels through a staged buffer, only the low half of
/// its address is passed per dispatch; the high half is aligned down and
/// set once as a base address. `lo as u64 + hi` reconstructs the original
/// address exactly.
pub fn split_address(address: u64) -> (u32, u64) {
    let lo = address as u32;
    let hi = address & !u64::from(u32::MAX);
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_size() {
        assert_eq!(FILTER_INDICES_LAYOUT.size_bytes(), 12);
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = RecordBuilder::new(&FILTER_INDICES_LAYOUT)
            .push_value(3)
            .push_value(9)
            .push_value(1)
            .build();
        let b = RecordBuilder::new(&FILTER_INDICES_LAYOUT)
            .push_value(3)
            .push_value(9)
            .push_value(1)
            .build();
        assert_eq!(a.bytes(), b.bytes());
    }

    #[test]
    fn test_sample_record_serializes_in_field_order() {
        // {tex_in: 0, tex_out: 1, smp_linear: 0} -> the u32 values 0, 1, 0.
        let record = FilterIndices {
            tex_in: 0,
            tex_out: 1,
            smp_linear: 0,
        }
        .to_record();

        assert_eq!(record.size(), 12);
        let words: Vec<u32> = record
            .bytes()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(words, vec![0, 1, 0]);
    }

    #[test]
    fn test_builder_matches_pod_bytes() {
        let indices = FilterIndices {
            tex_in: 5,
            tex_out: 6,
            smp_linear: 2,
        };
        assert_eq!(indices.to_record().bytes(), bytemuck::bytes_of(&indices));
    }

    #[test]
    #[should_panic(expected = "expects 3 fields")]
    fn test_underfilled_record_panics() {
        RecordBuilder::new(&FILTER_INDICES_LAYOUT)
            .push_value(0)
            .build();
    }

    #[test]
    #[should_panic(expected = "has only 3 fields")]
    fn test_overfilled_record_panics() {
        let _ = RecordBuilder::new(&FILTER_INDICES_LAYOUT)
            .push_value(0)
            .push_value(1)
            .push_value(2)
            .push_value(3);
    }

    #[test]
    #[should_panic(expected = "invalid descriptor index")]
    fn test_invalid_index_panics() {
        let _ = RecordBuilder::new(&FILTER_INDICES_LAYOUT).push_index(DescriptorIndex::INVALID);
    }

    #[test]
    fn test_split_address_reconstructs() {
        for address in [0u64, 0x1000, 0xFFFF_FFFF, 0x1_0000_0000, 0xDEAD_BEEF_CAFE] {
            let (lo, hi) = split_address(address);
            assert_eq!(u64::from(lo) + hi, address);
            assert_eq!(hi & 0xFFFF_FFFF, 0);
        }
    }
}
