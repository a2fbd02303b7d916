//! Bounded-range bit stream used by every message
//!
//! Reading and writing share one code path: payloads implement a single
//! `serialize` over `S: Stream`, and `S::IS_READING` tells them which way the
//! data flows. Every integer is written with exactly the bits its declared
//! range needs, and a read outside that range is an error.

use bytes::{BufMut, Bytes, BytesMut};
use glam::{Quat, Vec3};

use crate::net::message::MessageType;
use crate::sim::entity::Handle;
use crate::sim::team::Team;
use crate::sim::tuning::{MAX_ENTITIES, MAX_PLAYERS, MAX_TEAMS};
use crate::sim::world::{Entity, Player};

/// Stream failures. Any of these drops the message being decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream truncated")]
    Truncated,

    #[error("value {value} outside [{min}, {max}]")]
    OutOfRange { value: i64, min: i64, max: i64 },

    #[error("invalid enum tag {0}")]
    InvalidEnum(u32),

    #[error("unresolved reference needed for decoding")]
    UnresolvedRef,

    #[error("{0:?} is not accepted from clients")]
    NotAccepted(MessageType),
}

/// Precision of positions and rotations on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Low,
    Medium,
    High,
}

impl Resolution {
    /// Quantization steps per world unit
    fn position_scale(self) -> f32 {
        match self {
            Resolution::Low => 32.0,
            Resolution::Medium => 256.0,
            Resolution::High => 1024.0,
        }
    }

    fn quat_bits(self) -> u32 {
        match self {
            Resolution::Low => 8,
            Resolution::Medium => 12,
            Resolution::High => 16,
        }
    }
}

/// Positions are clamped to this cube
pub const POSITION_RANGE: f32 = 256.0;

/// Enums with a fixed, ordered set of wire tags
pub trait WireEnum: Copy + PartialEq + 'static {
    const VARIANTS: &'static [Self];
}

/// Declares the wire order of an enum's variants
macro_rules! wire_enum {
    ($ty:ty { $($variant:path),+ $(,)? }) => {
        impl $crate::net::stream::WireEnum for $ty {
            const VARIANTS: &'static [Self] = &[$($variant),+];
        }
    };
}
pub(crate) use wire_enum;

/// Arena-backed types that can be referenced on the wire
pub trait Referent {
    const INDEX_BITS: u32;
}

impl Referent for Entity {
    const INDEX_BITS: u32 = bits_required(MAX_ENTITIES as u32 - 1);
}

impl Referent for Player {
    const INDEX_BITS: u32 = bits_required(MAX_PLAYERS as u32 - 1);
}

/// Bits needed to store any value in `0..=max`
pub const fn bits_required(max: u32) -> u32 {
    if max == 0 {
        0
    } else {
        32 - max.leading_zeros()
    }
}

pub trait Stream {
    const IS_READING: bool;

    fn serialize_bits(&mut self, value: &mut u32, bits: u32) -> Result<(), StreamError>;

    fn serialize_bool(&mut self, value: &mut bool) -> Result<(), StreamError> {
        let mut raw = u32::from(*value);
        self.serialize_bits(&mut raw, 1)?;
        *value = raw != 0;
        Ok(())
    }

    fn serialize_int(&mut self, value: &mut i32, min: i32, max: i32) -> Result<(), StreamError> {
        debug_assert!(min < max);
        if !Self::IS_READING {
            debug_assert!(
                (min..=max).contains(value),
                "{value} outside [{min}, {max}]"
            );
        }
        let span = (i64::from(max) - i64::from(min)) as u32;
        let mut raw = (i64::from((*value).clamp(min, max)) - i64::from(min)) as u32;
        self.serialize_bits(&mut raw, bits_required(span))?;
        if Self::IS_READING {
            if raw > span {
                return Err(StreamError::OutOfRange {
                    value: i64::from(min) + i64::from(raw),
                    min: i64::from(min),
                    max: i64::from(max),
                });
            }
            *value = (i64::from(min) + i64::from(raw)) as i32;
        }
        Ok(())
    }

    fn serialize_i8(&mut self, value: &mut i8, min: i8, max: i8) -> Result<(), StreamError> {
        let mut wide = i32::from(*value);
        self.serialize_int(&mut wide, i32::from(min), i32::from(max))?;
        *value = wide as i8;
        Ok(())
    }

    fn serialize_i16(&mut self, value: &mut i16, min: i16, max: i16) -> Result<(), StreamError> {
        let mut wide = i32::from(*value);
        self.serialize_int(&mut wide, i32::from(min), i32::from(max))?;
        *value = wide as i16;
        Ok(())
    }

    fn serialize_enum<E: WireEnum>(&mut self, value: &mut E) -> Result<(), StreamError> {
        let count = E::VARIANTS.len() as u32;
        let mut raw = E::VARIANTS
            .iter()
            .position(|v| v == value)
            .unwrap_or_default() as u32;
        self.serialize_bits(&mut raw, bits_required(count.saturating_sub(1)))?;
        if Self::IS_READING {
            *value = *E::VARIANTS
                .get(raw as usize)
                .ok_or(StreamError::InvalidEnum(raw))?;
        }
        Ok(())
    }

    /// Presence bit, slot index and generation
    fn serialize_ref<T: Referent>(&mut self, value: &mut Option<Handle<T>>) -> Result<(), StreamError> {
        let mut present = value.is_some();
        self.serialize_bool(&mut present)?;
        if !present {
            *value = None;
            return Ok(());
        }
        let (mut index, mut generation) = value
            .map(|h| (h.index(), u32::from(h.generation())))
            .unwrap_or_default();
        self.serialize_bits(&mut index, T::INDEX_BITS)?;
        self.serialize_bits(&mut generation, 16)?;
        if Self::IS_READING {
            *value = Some(Handle::from_raw(index, generation as u16));
        }
        Ok(())
    }

    fn serialize_team(&mut self, team: &mut Team) -> Result<(), StreamError> {
        let mut raw = team.to_wire();
        self.serialize_i8(&mut raw, -1, MAX_TEAMS as i8 - 1)?;
        *team = Team::from_wire(raw);
        Ok(())
    }

    /// Uniformly quantized float in `[min, max]`
    fn serialize_f32_range(&mut self, value: &mut f32, min: f32, max: f32, bits: u32) -> Result<(), StreamError> {
        debug_assert!(min < max && bits > 0 && bits <= 24);
        let steps = ((1u32 << bits) - 1) as f32;
        let mut raw = if Self::IS_READING {
            0
        } else {
            debug_assert!(
                *value >= min - 1e-4 && *value <= max + 1e-4,
                "{value} outside [{min}, {max}]"
            );
            (((*value - min) / (max - min)).clamp(0.0, 1.0) * steps).round() as u32
        };
        self.serialize_bits(&mut raw, bits)?;
        if Self::IS_READING {
            *value = min + (raw as f32 / steps) * (max - min);
        }
        Ok(())
    }

    fn serialize_position(&mut self, value: &mut Vec3, resolution: Resolution) -> Result<(), StreamError> {
        let span = (POSITION_RANGE * 2.0 * resolution.position_scale()) as u32;
        let bits = bits_required(span);
        let scale = resolution.position_scale();
        for axis in 0..3 {
            let mut raw = if Self::IS_READING {
                0
            } else {
                ((value[axis].clamp(-POSITION_RANGE, POSITION_RANGE) + POSITION_RANGE) * scale)
                    .round() as u32
            };
            self.serialize_bits(&mut raw, bits)?;
            if Self::IS_READING {
                if raw > span {
                    return Err(StreamError::OutOfRange {
                        value: i64::from(raw),
                        min: 0,
                        max: i64::from(span),
                    });
                }
                value[axis] = raw as f32 / scale - POSITION_RANGE;
            }
        }
        Ok(())
    }

    /// Smallest-three encoding: index of the largest component plus the other three
    fn serialize_quat(&mut self, value: &mut Quat, resolution: Resolution) -> Result<(), StreamError> {
        const LIMIT: f32 = std::f32::consts::FRAC_1_SQRT_2;
        let bits = resolution.quat_bits();

        let mut components = value.normalize().to_array();
        let mut largest = 0u32;
        if !Self::IS_READING {
            for (i, c) in components.iter().enumerate() {
                if c.abs() > components[largest as usize].abs() {
                    largest = i as u32;
                }
            }
            if components[largest as usize] < 0.0 {
                components.iter_mut().for_each(|c| *c = -*c);
            }
        }

        self.serialize_bits(&mut largest, 2)?;
        let mut sum = 0.0;
        for i in (0..4).filter(|&i| i != largest as usize) {
            self.serialize_f32_range(&mut components[i], -LIMIT, LIMIT, bits)?;
            sum += components[i] * components[i];
        }

        if Self::IS_READING {
            components[largest as usize] = (1.0 - sum).max(0.0).sqrt();
            *value = Quat::from_array(components).normalize();
        }
        Ok(())
    }
}

/// Bit writer over a growable buffer
#[derive(Debug, Default)]
pub struct StreamWrite {
    buf: BytesMut,
    scratch: u64,
    scratch_bits: u32,
}

impl StreamWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn write_bits(&mut self, value: u32, bits: u32) {
        debug_assert!(bits <= 32);
        if bits == 0 {
            return;
        }
        let mask = if bits == 32 { u32::MAX } else { (1u32 << bits) - 1 };
        self.scratch |= u64::from(value & mask) << self.scratch_bits;
        self.scratch_bits += bits;
        while self.scratch_bits >= 8 {
            self.buf.put_u8(self.scratch as u8);
            self.scratch >>= 8;
            self.scratch_bits -= 8;
        }
    }

    /// Pad the trailing byte and hand the buffer off
    pub fn finish(mut self) -> Bytes {
        if self.scratch_bits > 0 {
            self.buf.put_u8(self.scratch as u8);
        }
        self.buf.freeze()
    }
}

impl Stream for StreamWrite {
    const IS_READING: bool = false;

    fn serialize_bits(&mut self, value: &mut u32, bits: u32) -> Result<(), StreamError> {
        self.write_bits(*value, bits);
        Ok(())
    }
}

/// Bit reader over an immutable buffer
#[derive(Debug, Clone)]
pub struct StreamRead {
    data: Bytes,
    bit: usize,
}

impl StreamRead {
    pub fn new(data: Bytes) -> Self {
        Self { data, bit: 0 }
    }

    pub(crate) fn read_bits(&mut self, bits: u32) -> Result<u32, StreamError> {
        if self.bit + bits as usize > self.data.len() * 8 {
            return Err(StreamError::Truncated);
        }
        let mut value = 0u32;
        for i in 0..bits {
            let byte = self.data[self.bit / 8];
            let set = (byte >> (self.bit % 8)) & 1;
            value |= u32::from(set) << i;
            self.bit += 1;
        }
        Ok(value)
    }
}

impl Stream for StreamRead {
    const IS_READING: bool = true;

    fn serialize_bits(&mut self, value: &mut u32, bits: u32) -> Result<(), StreamError> {
        *value = self.read_bits(bits)?;
        Ok(())
    }
}
