//! Base arrays and the base arena
//!
//! A `Base` owns the contiguous typed buffer behind one or more views. Bases
//! live in a `BaseArena` and are referenced everywhere else by `BaseHandle`
//! (dense index), so blocks and views never hold pointers into the arena.
//!
//! A base's buffer may be absent until first realized by the engine; a
//! realized buffer can be detached into the victim cache and later re-handed
//! out, in which case its contents are unspecified until rewritten.

use crate::error::{Error, Result};
use crate::types::ScalarType;
use std::fmt;

/// Handle to a base array in a [`BaseArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BaseHandle(pub u32);

impl BaseHandle {
    pub const fn new(id: u32) -> Self {
        BaseHandle(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "base{}", self.0)
    }
}

/// One base array: element type, element count, optionally realized buffer
#[derive(Debug)]
pub struct Base {
    dtype: ScalarType,
    nelem: usize,
    data: Option<Vec<u8>>,
}

impl Base {
    pub fn new(dtype: ScalarType, nelem: usize) -> Self {
        Self {
            dtype,
            nelem,
            data: None,
        }
    }

    pub fn dtype(&self) -> ScalarType {
        self.dtype
    }

    pub fn nelem(&self) -> usize {
        self.nelem
    }

    /// Buffer size in bytes once realized
    pub fn size_bytes(&self) -> usize {
        self.nelem * self.dtype.size_of()
    }

    pub fn is_realized(&self) -> bool {
        self.data.is_some()
    }

    /// Attach a buffer. Length must match `size_bytes()`.
    pub fn attach(&mut self, buf: Vec<u8>) {
        debug_assert_eq!(buf.len(), self.size_bytes());
        self.data = Some(buf);
    }

    /// Detach the buffer, leaving the base unrealized
    pub fn detach(&mut self) -> Option<Vec<u8>> {
        self.data.take()
    }

    /// Scalar outputs are realized with a single element. The engine calls
    /// this before allocation when the output layout collapsed to a scalar.
    pub fn collapse_to_scalar(&mut self) {
        if self.data.is_none() {
            self.nelem = 1;
        }
    }

    /// Raw mutable pointer to the realized buffer
    pub fn data_ptr_mut(&mut self) -> Option<*mut u8> {
        self.data.as_mut().map(|d| d.as_mut_ptr())
    }

    /// Typed view of the realized buffer
    pub fn as_slice<T: bytemuck::Pod>(&self) -> Result<&[T]> {
        self.dtype.check_elem_size(std::mem::size_of::<T>())?;
        let data = self.data.as_ref().ok_or(Error::Unrealized(0))?;
        Ok(bytemuck::cast_slice(data))
    }

    /// Typed mutable view of the realized buffer
    pub fn as_mut_slice<T: bytemuck::Pod>(&mut self) -> Result<&mut [T]> {
        self.dtype.check_elem_size(std::mem::size_of::<T>())?;
        let data = self.data.as_mut().ok_or(Error::Unrealized(0))?;
        Ok(bytemuck::cast_slice_mut(data))
    }
}

/// Append-only arena of base arrays
///
/// The front end allocates bases here and hands the arena to the engine for
/// the duration of each batch. Handles are dense indices and never reused.
#[derive(Debug, Default)]
pub struct BaseArena {
    bases: Vec<Base>,
}

impl BaseArena {
    pub fn new() -> Self {
        Self { bases: Vec::new() }
    }

    pub fn alloc(&mut self, dtype: ScalarType, nelem: usize) -> BaseHandle {
        let id = self.bases.len() as u32;
        self.bases.push(Base::new(dtype, nelem));
        BaseHandle(id)
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn get(&self, handle: BaseHandle) -> Result<&Base> {
        self.bases
            .get(handle.0 as usize)
            .ok_or(Error::InvalidBase(handle.0))
    }

    pub fn get_mut(&mut self, handle: BaseHandle) -> Result<&mut Base> {
        self.bases
            .get_mut(handle.0 as usize)
            .ok_or(Error::InvalidBase(handle.0))
    }

    /// Typed read of a realized base, for hosts and tests
    pub fn read<T: bytemuck::Pod>(&self, handle: BaseHandle) -> Result<Vec<T>> {
        Ok(self.get(handle)?.as_slice::<T>()?.to_vec())
    }

    /// Realize a base (plain allocation, no recycling) and fill it from a slice
    pub fn write<T: bytemuck::Pod>(&mut self, handle: BaseHandle, values: &[T]) -> Result<()> {
        let base = self.get_mut(handle)?;
        if !base.is_realized() {
            let buf = vec![0u8; base.size_bytes()];
            base.attach(buf);
        }
        let slot = base.as_mut_slice::<T>()?;
        slot[..values.len()].copy_from_slice(values);
        Ok(())
    }
}
