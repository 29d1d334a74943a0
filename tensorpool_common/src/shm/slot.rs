//! Header-ring slot layout and tensor header.
//!
//! Each header-ring slot is [`HEADER_SLOT_BYTES`](crate::consts::HEADER_SLOT_BYTES)
//! wide and starts with the seqlock word:
//!
//! ```text
//! Offset  Size  Field
//! 0       8     seq_commit        (seq << 1) | in_progress
//! 8       8     timestamp_ns
//! 16      4     meta_version
//! 20      4     values_len_bytes
//! 24      4     payload_slot
//! 28      4     payload_offset
//! 32      2     pool_id
//! 34      75    tensor header
//! ```
//!
//! ## Seqlock encoding
//!
//! - Odd `seq_commit` = write in progress (reader must not trust the slot)
//! - Even `seq_commit` = committed; frame sequence = `seq_commit >> 1`
//!
//! `seq_commit` is 8-byte aligned in every slot and accessed as `AtomicU64`
//! by the runtime. Everything else is plain little-endian bytes copied out
//! between two loads of `seq_commit`.

use super::le;
use crate::consts::MAX_DIMS;
use crate::shm::LayoutError;
use static_assertions::const_assert;

/// Offset of `seq_commit` within a slot.
pub const SEQ_COMMIT_OFFSET: usize = 0;
const TIMESTAMP_OFFSET: usize = 8;
const META_VERSION_OFFSET: usize = 16;
const VALUES_LEN_OFFSET: usize = 20;
const PAYLOAD_SLOT_OFFSET: usize = 24;
const PAYLOAD_OFFSET_OFFSET: usize = 28;
const POOL_ID_OFFSET: usize = 32;
/// Offset of the embedded tensor header within a slot.
pub const TENSOR_HEADER_OFFSET: usize = 34;

/// Encoded tensor header length in bytes.
pub const TENSOR_HEADER_LEN: usize = 11 + 2 * 4 * MAX_DIMS;

/// Encoded slot header length in bytes (including `seq_commit`).
pub const SLOT_HEADER_LEN: usize = TENSOR_HEADER_OFFSET + TENSOR_HEADER_LEN;

const_assert!(TENSOR_HEADER_LEN == 75);
const_assert!(SLOT_HEADER_LEN <= crate::consts::HEADER_SLOT_BYTES as usize);

/// `seq_commit` value marking `seq` as in progress.
#[inline]
pub const fn seq_in_progress(seq: u64) -> u64 {
    (seq << 1) | 1
}

/// `seq_commit` value publishing `seq`.
#[inline]
pub const fn seq_committed(seq: u64) -> u64 {
    seq << 1
}

/// Whether a `seq_commit` value is stable (even).
#[inline]
pub const fn is_stable(seq_commit: u64) -> bool {
    seq_commit & 1 == 0
}

/// Frame sequence number encoded in a `seq_commit` value.
#[inline]
pub const fn frame_seq(seq_commit: u64) -> u64 {
    seq_commit >> 1
}

/// Tensor element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u16)]
pub enum Dtype {
    /// Unspecified element type (opaque bytes).
    #[default]
    Unknown = 0,
    /// Unsigned 8-bit.
    U8 = 1,
    /// Signed 8-bit.
    I8 = 2,
    /// Unsigned 16-bit.
    U16 = 3,
    /// Signed 16-bit.
    I16 = 4,
    /// Unsigned 32-bit.
    U32 = 5,
    /// Signed 32-bit.
    I32 = 6,
    /// Unsigned 64-bit.
    U64 = 7,
    /// Signed 64-bit.
    I64 = 8,
    /// IEEE half precision.
    F16 = 9,
    /// IEEE single precision.
    F32 = 10,
    /// IEEE double precision.
    F64 = 11,
    /// One byte per boolean.
    Bool = 12,
}

impl Dtype {
    /// Convert from the raw wire value.
    pub const fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => Self::Unknown,
            1 => Self::U8,
            2 => Self::I8,
            3 => Self::U16,
            4 => Self::I16,
            5 => Self::U32,
            6 => Self::I32,
            7 => Self::U64,
            8 => Self::I64,
            9 => Self::F16,
            10 => Self::F32,
            11 => Self::F64,
            12 => Self::Bool,
            _ => return None,
        })
    }

    /// Element size in bytes (1 for `Unknown`).
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Unknown | Self::U8 | Self::I8 | Self::Bool => 1,
            Self::U16 | Self::I16 | Self::F16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }
}

/// Memory order of the tensor dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u16)]
pub enum MajorOrder {
    /// Last dimension contiguous (C order).
    #[default]
    Row = 1,
    /// First dimension contiguous (Fortran order).
    Column = 2,
}

impl MajorOrder {
    /// Convert from the raw wire value.
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Row),
            2 => Some(Self::Column),
            _ => None,
        }
    }
}

/// Unit in which in-flight fill progress is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ProgressUnit {
    /// Progress not reported.
    #[default]
    None = 0,
    /// Progress reported in rows of `progress_stride_bytes`.
    Rows = 1,
    /// Progress reported in columns of `progress_stride_bytes`.
    Columns = 2,
}

impl ProgressUnit {
    /// Convert from the raw wire value; unknown values map to `None`.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Rows,
            2 => Self::Columns,
            _ => Self::None,
        }
    }
}

/// Shape and element description of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TensorHeader {
    /// Element type.
    pub dtype: Dtype,
    /// Dimension order.
    pub major_order: MajorOrder,
    /// Number of valid entries in `dims`/`strides`.
    pub ndims: u8,
    /// Payload alignment hint in bytes.
    pub pad_align: u8,
    /// Unit of progress reports.
    pub progress_unit: ProgressUnit,
    /// Bytes per progress unit.
    pub progress_stride_bytes: u32,
    /// Dimension extents; entries past `ndims` are zero.
    pub dims: [i32; MAX_DIMS],
    /// Byte strides; entries past `ndims` are zero.
    pub strides: [i32; MAX_DIMS],
}

impl TensorHeader {
    /// Row-major contiguous header for `dims` of `dtype`.
    ///
    /// # Errors
    /// `TooManyDims` if `dims.len() > MAX_DIMS`, `NegativeDim` for a negative extent.
    pub fn contiguous(dtype: Dtype, dims: &[i32]) -> Result<Self, LayoutError> {
        if dims.len() > MAX_DIMS {
            return Err(LayoutError::TooManyDims {
                ndims: dims.len().min(u8::MAX as usize) as u8,
                max: MAX_DIMS,
            });
        }
        let mut header = Self {
            dtype,
            ndims: dims.len() as u8,
            ..Self::default()
        };
        let mut stride = dtype.size_bytes() as i32;
        for (i, &d) in dims.iter().enumerate().rev() {
            if d < 0 {
                return Err(LayoutError::NegativeDim { index: i, value: d });
            }
            header.dims[i] = d;
            header.strides[i] = stride;
            stride = stride.saturating_mul(d);
        }
        Ok(header)
    }

    /// Valid dimension extents.
    pub fn dims(&self) -> &[i32] {
        &self.dims[..(self.ndims as usize).min(MAX_DIMS)]
    }

    /// Valid byte strides.
    pub fn strides(&self) -> &[i32] {
        &self.strides[..(self.ndims as usize).min(MAX_DIMS)]
    }

    /// Dense byte length implied by dims and dtype.
    pub fn dense_len(&self) -> usize {
        self.dims()
            .iter()
            .fold(self.dtype.size_bytes(), |acc, &d| acc.saturating_mul(d.max(0) as usize))
    }

    /// Check rank and extents.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.ndims as usize > MAX_DIMS {
            return Err(LayoutError::TooManyDims {
                ndims: self.ndims,
                max: MAX_DIMS,
            });
        }
        if let Some((index, &value)) = self.dims().iter().enumerate().find(|(_, d)| **d < 0) {
            return Err(LayoutError::NegativeDim { index, value });
        }
        Ok(())
    }

    /// Encode into `buf[..TENSOR_HEADER_LEN]`.
    pub fn encode_into(&self, buf: &mut [u8]) {
        le::put_u16(buf, 0, self.dtype as u16);
        le::put_u16(buf, 2, self.major_order as u16);
        buf[4] = self.ndims;
        buf[5] = self.pad_align;
        buf[6] = self.progress_unit as u8;
        le::put_u32(buf, 7, self.progress_stride_bytes);
        for i in 0..MAX_DIMS {
            le::put_i32(buf, 11 + 4 * i, self.dims[i]);
            le::put_i32(buf, 11 + 4 * MAX_DIMS + 4 * i, self.strides[i]);
        }
    }

    /// Decode from `buf[..TENSOR_HEADER_LEN]`.
    pub fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        if buf.len() < TENSOR_HEADER_LEN {
            return Err(LayoutError::Truncated {
                needed: TENSOR_HEADER_LEN,
                actual: buf.len(),
            });
        }
        let raw_dtype = le::get_u16(buf, 0);
        let raw_order = le::get_u16(buf, 2);
        let mut header = Self {
            dtype: Dtype::from_u16(raw_dtype).ok_or(LayoutError::UnknownDtype(raw_dtype))?,
            major_order: MajorOrder::from_u16(raw_order)
                .ok_or(LayoutError::UnknownMajorOrder(raw_order))?,
            ndims: buf[4],
            pad_align: buf[5],
            progress_unit: ProgressUnit::from_u8(buf[6]),
            progress_stride_bytes: le::get_u32(buf, 7),
            dims: [0; MAX_DIMS],
            strides: [0; MAX_DIMS],
        };
        for i in 0..MAX_DIMS {
            header.dims[i] = le::get_i32(buf, 11 + 4 * i);
            header.strides[i] = le::get_i32(buf, 11 + 4 * MAX_DIMS + 4 * i);
        }
        header.validate()?;
        Ok(header)
    }
}

/// Decoded header-ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotHeader {
    /// Seqlock word as observed when the slot was copied.
    pub seq_commit: u64,
    /// Producer timestamp of the frame, nanoseconds.
    pub timestamp_ns: u64,
    /// Metadata version in force when the frame was committed.
    pub meta_version: u32,
    /// Valid payload bytes.
    pub values_len_bytes: u32,
    /// Payload pool slot index.
    pub payload_slot: u32,
    /// Byte offset within the payload slot.
    pub payload_offset: u32,
    /// Payload pool id.
    pub pool_id: u16,
    /// Shape of the payload.
    pub tensor: TensorHeader,
}

impl SlotHeader {
    /// Frame sequence number of this slot.
    #[inline]
    pub const fn seq(&self) -> u64 {
        frame_seq(self.seq_commit)
    }

    /// Encode every field except `seq_commit` into `slot[..SLOT_HEADER_LEN]`.
    ///
    /// `seq_commit` is owned by the seqlock and written separately.
    pub fn encode_body(&self, slot: &mut [u8]) {
        le::put_u64(slot, TIMESTAMP_OFFSET, self.timestamp_ns);
        le::put_u32(slot, META_VERSION_OFFSET, self.meta_version);
        le::put_u32(slot, VALUES_LEN_OFFSET, self.values_len_bytes);
        le::put_u32(slot, PAYLOAD_SLOT_OFFSET, self.payload_slot);
        le::put_u32(slot, PAYLOAD_OFFSET_OFFSET, self.payload_offset);
        le::put_u16(slot, POOL_ID_OFFSET, self.pool_id);
        self.tensor
            .encode_into(&mut slot[TENSOR_HEADER_OFFSET..SLOT_HEADER_LEN]);
    }

    /// Decode a slot copy, including `seq_commit`.
    pub fn decode(slot: &[u8]) -> Result<Self, LayoutError> {
        if slot.len() < SLOT_HEADER_LEN {
            return Err(LayoutError::Truncated {
                needed: SLOT_HEADER_LEN,
                actual: slot.len(),
            });
        }
        Ok(Self {
            seq_commit: le::get_u64(slot, SEQ_COMMIT_OFFSET),
            timestamp_ns: le::get_u64(slot, TIMESTAMP_OFFSET),
            meta_version: le::get_u32(slot, META_VERSION_OFFSET),
            values_len_bytes: le::get_u32(slot, VALUES_LEN_OFFSET),
            payload_slot: le::get_u32(slot, PAYLOAD_SLOT_OFFSET),
            payload_offset: le::get_u32(slot, PAYLOAD_OFFSET_OFFSET),
            pool_id: le::get_u16(slot, POOL_ID_OFFSET),
            tensor: TensorHeader::decode(&slot[TENSOR_HEADER_OFFSET..SLOT_HEADER_LEN])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seqlock_encoding() {
        assert_eq!(seq_committed(3), 6);
        assert_eq!(seq_in_progress(3), 7);
        assert!(is_stable(seq_committed(3)));
        assert!(!is_stable(seq_in_progress(3)));
        assert_eq!(frame_seq(seq_in_progress(3)), 3);
        assert_eq!(frame_seq(seq_committed(3)), 3);
    }

    #[test]
    fn contiguous_strides_are_row_major() {
        let h = TensorHeader::contiguous(Dtype::F32, &[2, 3, 4]).unwrap();
        assert_eq!(h.dims(), &[2, 3, 4]);
        assert_eq!(h.strides(), &[48, 16, 4]);
        assert_eq!(h.dense_len(), 96);
    }

    #[test]
    fn contiguous_rejects_rank_nine() {
        let err = TensorHeader::contiguous(Dtype::U8, &[1; 9]).unwrap_err();
        assert!(matches!(err, LayoutError::TooManyDims { ndims: 9, .. }));
    }

    #[test]
    fn contiguous_rejects_negative_dim() {
        let err = TensorHeader::contiguous(Dtype::U8, &[4, -1]).unwrap_err();
        assert_eq!(err, LayoutError::NegativeDim { index: 1, value: -1 });
    }

    #[test]
    fn slot_body_leaves_seq_commit_untouched() {
        let mut slot = [0xAAu8; 256];
        let header = SlotHeader {
            seq_commit: 0,
            timestamp_ns: 99,
            meta_version: 2,
            values_len_bytes: 96,
            payload_slot: 5,
            payload_offset: 0,
            pool_id: 1,
            tensor: TensorHeader::contiguous(Dtype::F32, &[2, 3, 4]).unwrap(),
        };
        header.encode_body(&mut slot);
        assert_eq!(&slot[0..8], &[0xAA; 8]);

        slot[0..8].copy_from_slice(&seq_committed(12).to_le_bytes());
        let decoded = SlotHeader::decode(&slot).unwrap();
        assert_eq!(decoded.seq(), 12);
        assert_eq!(decoded.tensor, header.tensor);
        assert_eq!(decoded.values_len_bytes, 96);
        assert_eq!(decoded.pool_id, 1);
    }

    #[test]
    fn decode_rejects_unknown_dtype() {
        let mut buf = [0u8; TENSOR_HEADER_LEN];
        TensorHeader::default().encode_into(&mut buf);
        buf[0] = 0xFE;
        assert!(matches!(
            TensorHeader::decode(&buf),
            Err(LayoutError::UnknownDtype(0xFE))
        ));
    }

    #[test]
    fn decode_rejects_oversized_rank() {
        let mut buf = [0u8; TENSOR_HEADER_LEN];
        TensorHeader::default().encode_into(&mut buf);
        buf[4] = 9;
        assert!(matches!(
            TensorHeader::decode(&buf),
            Err(LayoutError::TooManyDims { ndims: 9, .. })
        ));
    }
}
