//! Composite Construction and Disposal
//!
//! GPU storage can't be cheaply copied, so a complex tensor shares storage
//! with its real and imaginary parts. The composite record owns no bytes; it
//! only links back to the two float32 records.
//!
//! Each link holds two counts on its constituent:
//!
//! - a **standard** count through the engine, so the engine's own
//!   bookkeeping sees one more consumer
//! - a **kept** count, which the engine cannot infer from its consumers and
//!   which blocks physical release while the composite is alive
//!
//! [`dispose_composite`] returns both counts and removes the composite
//! record. It never frees constituent storage itself; the engine does that
//! once both counters reach zero.
//!
//! # Example
//!
//! ```rust
//! use texalias::composite::{dispose_composite, make_composite};
//! use texalias::config::CompositeConfig;
//! use texalias::record::DType;
//! use texalias::table::{BufferTable, RecordTable};
//!
//! let mut table = RecordTable::new();
//! let re = table.allocate(&[2, 3], DType::Float32);
//! let im = table.allocate(&[2, 3], DType::Float32);
//!
//! let c = make_composite(&mut table, re, im, &CompositeConfig::default()).unwrap();
//! assert_eq!(table.lookup(re).unwrap().kept_ref_count(), 1);
//!
//! dispose_composite(&mut table, c).unwrap();
//! assert_eq!(table.lookup(re).unwrap().kept_ref_count(), 0);
//! assert!(table.lookup(c).is_none());
//! ```

use tracing::{debug, error, trace, warn};

use crate::config::CompositeConfig;
use crate::error::{AliasError, AliasResult, Counter};
use crate::record::{AliasLinks, BufferHandle, DType, TensorInfo};
use crate::table::BufferTable;

/// Which half of a composite value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    Real,
    Imag,
}

/// Build a composite record aliasing `real` and `imag`.
///
/// Validation runs before any counter is touched, and counter bumps are
/// undone if a later step fails, so a failed call leaves the table unchanged.
pub fn make_composite<T>(
    table: &mut T,
    real: BufferHandle,
    imag: BufferHandle,
    options: &CompositeConfig,
) -> AliasResult<BufferHandle>
where
    T: BufferTable + ?Sized,
{
    let real_info = constituent(table, real, options)?;
    let imag_info = constituent(table, imag, options)?;

    if real == imag && !options.allow_shared_constituent {
        return Err(AliasError::DuplicateConstituent(real));
    }
    if options.validate_shapes && real_info.shape != imag_info.shape {
        return Err(AliasError::ShapeMismatch {
            real: real_info.shape,
            imag: imag_info.shape,
        });
    }

    let mut pinned = Vec::with_capacity(4);
    for handle in [real, imag] {
        for counter in [Counter::Standard, Counter::Kept] {
            let result = match counter {
                Counter::Standard => table.increment_standard_ref_count(handle),
                Counter::Kept => table.increment_kept_ref_count(handle),
            };
            match result {
                Ok(count) => {
                    trace!(handle, %counter, count, "pinned constituent");
                    pinned.push((handle, counter));
                }
                Err(e) => {
                    unpin(table, &pinned);
                    return Err(e);
                }
            }
        }
    }

    let composite = table.allocate(&real_info.shape, DType::Complex64);
    let links = AliasLinks {
        real: TensorInfo::new(real, &real_info.shape, real_info.dtype),
        imag: TensorInfo::new(imag, &imag_info.shape, imag_info.dtype),
    };
    let linked = table
        .lookup_mut(composite)
        .ok_or(AliasError::InvalidReference(composite))
        .and_then(|record| record.set_alias_links(links));
    if let Err(e) = linked {
        table.remove(composite);
        unpin(table, &pinned);
        return Err(e);
    }

    debug!(composite, real, imag, shape = ?real_info.shape, "made composite");
    Ok(composite)
}

/// Tear down a composite record, returning both counts on each constituent.
///
/// Kept counts are checked before the first decrement; a shortfall means a
/// construct/dispose pair was broken earlier and the table is left as found.
/// A constituent whose standard count the engine already took to zero only
/// gets its kept count back.
pub fn dispose_composite<T>(table: &mut T, composite: BufferHandle) -> AliasResult<()>
where
    T: BufferTable + ?Sized,
{
    let links = table
        .resolve(composite)?
        .alias_links()
        .cloned()
        .ok_or(AliasError::NotComposite(composite))?;

    for info in links.iter() {
        let required = links.iter().filter(|l| l.handle == info.handle).count() as u32;
        let record = table
            .lookup(info.handle)
            .ok_or(AliasError::InvalidReference(info.handle))?;
        if record.kept_ref_count() < required {
            error!(
                composite,
                handle = info.handle,
                kept = record.kept_ref_count(),
                "kept refcount underflow while disposing composite"
            );
            return Err(AliasError::CounterUnderflow {
                handle: info.handle,
                counter: Counter::Kept,
            });
        }
    }

    for info in links.iter() {
        // The engine may already have dropped every standard reference while
        // the composite was alive; only the kept count is ours to return.
        let holds_standard = table
            .lookup(info.handle)
            .is_some_and(|r| r.standard_ref_count() > 0);
        if holds_standard {
            let kept = table.decrement_kept_ref_count(info.handle)?;
            let standard = table.decrement_standard_ref_count(info.handle)?;
            trace!(handle = info.handle, standard, kept, "unpinned constituent");
        } else {
            warn!(
                composite,
                handle = info.handle,
                "standard refcount already zero, returning kept count only"
            );
            table.decrement_kept_ref_count(info.handle)?;
        }
    }

    table.remove(composite);
    debug!(
        composite,
        real = links.real.handle,
        imag = links.imag.handle,
        "disposed composite"
    );
    Ok(())
}

/// Reference to the real part of `composite`. The caller receives a standard
/// reference on the returned record.
pub fn real_part<T>(table: &mut T, composite: BufferHandle) -> AliasResult<TensorInfo>
where
    T: BufferTable + ?Sized,
{
    part(table, composite, Part::Real)
}

/// Reference to the imaginary part of `composite`. The caller receives a
/// standard reference on the returned record.
pub fn imag_part<T>(table: &mut T, composite: BufferHandle) -> AliasResult<TensorInfo>
where
    T: BufferTable + ?Sized,
{
    part(table, composite, Part::Imag)
}

pub fn part<T>(table: &mut T, composite: BufferHandle, which: Part) -> AliasResult<TensorInfo>
where
    T: BufferTable + ?Sized,
{
    let links = table
        .resolve(composite)?
        .alias_links()
        .ok_or(AliasError::NotComposite(composite))?;
    let info = match which {
        Part::Real => links.real.clone(),
        Part::Imag => links.imag.clone(),
    };
    table.increment_standard_ref_count(info.handle)?;
    Ok(info)
}

/// Undo counter bumps in reverse order.
fn unpin<T>(table: &mut T, pinned: &[(BufferHandle, Counter)])
where
    T: BufferTable + ?Sized,
{
    for &(handle, counter) in pinned.iter().rev() {
        let _ = match counter {
            Counter::Standard => table.decrement_standard_ref_count(handle),
            Counter::Kept => table.decrement_kept_ref_count(handle),
        };
    }
}

fn constituent<T>(
    table: &T,
    handle: BufferHandle,
    options: &CompositeConfig,
) -> AliasResult<TensorInfo>
where
    T: BufferTable + ?Sized,
{
    let record = table
        .lookup(handle)
        .ok_or(AliasError::InvalidReference(handle))?;
    let dtype = record.dtype();
    // Nesting would let one composite's links point at storage it doesn't own.
    if dtype.is_composite() || (options.validate_dtypes && dtype != DType::Float32) {
        return Err(AliasError::InvalidConstituent { handle, dtype });
    }
    Ok(record.info())
}
