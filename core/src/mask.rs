//! Operations on binary masks.

use ndarray::{ArrayView2, Zip};

use crate::error::{FlagError, Result};
use crate::types::{Grid, Mask};

fn ensure_same_shape(a: (usize, usize), b: (usize, usize), what: &str) -> Result<()> {
    if a != b {
        return Err(FlagError::Shape(format!(
            "{}: shapes {:?} and {:?} differ",
            what, a, b
        )));
    }
    Ok(())
}

/// Logical OR of two masks.
pub fn combine(a: ArrayView2<'_, u8>, b: ArrayView2<'_, u8>) -> Result<Mask> {
    ensure_same_shape(a.dim(), b.dim(), "combine")?;
    Ok(Zip::from(&a)
        .and(&b)
        .map_collect(|&x, &y| u8::from(x != 0 || y != 0)))
}

/// OR `other` into `mask` in place.
pub fn combine_into(mask: &mut Mask, other: ArrayView2<'_, u8>) -> Result<()> {
    ensure_same_shape(mask.dim(), other.dim(), "combine")?;
    Zip::from(mask).and(&other).for_each(|m, &o| {
        if o != 0 {
            *m = 1;
        }
    });
    Ok(())
}

/// Fraction of flagged cells, 0 for an empty mask.
pub fn flagged_fraction(mask: ArrayView2<'_, u8>) -> f64 {
    if mask.is_empty() {
        return 0.0;
    }
    let flagged = mask.iter().filter(|&&v| v != 0).count();
    flagged as f64 / mask.len() as f64
}

/// Copy of `grid` with every flagged cell replaced by NaN.
pub fn apply_mask(grid: ArrayView2<'_, f64>, mask: ArrayView2<'_, u8>) -> Result<Grid> {
    ensure_same_shape(grid.dim(), mask.dim(), "apply_mask")?;
    Ok(Zip::from(&grid)
        .and(&mask)
        .map_collect(|&v, &m| if m != 0 { f64::NAN } else { v }))
}
