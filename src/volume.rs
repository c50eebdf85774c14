//! Volume arithmetic and transfer splitting.
//!
//! All volumes are carried in microlitres as a [`Volume`] newtype. Floating point
//! volumes are never compared exactly: every comparison that decides planner behaviour
//! takes an explicit epsilon (see [`DEFAULT_EPSILON_UL`] and `PlannerConfig`).
//!
//! [`split_volume`] turns one oversized volume into equal sub-volumes a channel can
//! move in one stroke. [`split_multi`] does the same for every channel of a head and
//! re-packs the pieces into parallel rounds.

use crate::error::{PlanError, PlanResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};

/// Default tolerance for volume comparisons, in microlitres.
pub const DEFAULT_EPSILON_UL: f64 = 1e-4;

/// A liquid volume in microlitres.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Volume(f64);

impl Volume {
    /// The empty volume.
    pub const ZERO: Volume = Volume(0.0);

    /// Volume from microlitres.
    pub const fn ul(microlitres: f64) -> Self {
        Volume(microlitres)
    }

    /// Volume from millilitres.
    pub fn ml(millilitres: f64) -> Self {
        Volume(millilitres * 1000.0)
    }

    /// Raw value in microlitres.
    pub const fn as_ul(self) -> f64 {
        self.0
    }

    /// True if the volume is within `eps` of zero.
    pub fn is_zero(self, eps: f64) -> bool {
        self.0.abs() <= eps
    }

    /// Tolerant equality.
    pub fn approx_eq(self, other: Volume, eps: f64) -> bool {
        (self.0 - other.0).abs() <= eps
    }

    /// Strictly less than `other` by more than `eps`.
    pub fn less_than(self, other: Volume, eps: f64) -> bool {
        self.0 < other.0 - eps
    }

    /// Strictly greater than `other` by more than `eps`.
    pub fn greater_than(self, other: Volume, eps: f64) -> bool {
        self.0 > other.0 + eps
    }

    /// Subtract and clamp at zero; results within `eps` of zero become exactly zero.
    pub fn saturating_sub(self, other: Volume, eps: f64) -> Volume {
        let v = self.0 - other.0;
        if v <= eps {
            Volume::ZERO
        } else {
            Volume(v)
        }
    }

    /// The smaller of two volumes.
    pub fn min(self, other: Volume) -> Volume {
        Volume(self.0.min(other.0))
    }

    /// The larger of two volumes.
    pub fn max(self, other: Volume) -> Volume {
        Volume(self.0.max(other.0))
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} ul", self.0)
    }
}

impl Add for Volume {
    type Output = Volume;
    fn add(self, rhs: Volume) -> Volume {
        Volume(self.0 + rhs.0)
    }
}

impl Sub for Volume {
    type Output = Volume;
    fn sub(self, rhs: Volume) -> Volume {
        Volume(self.0 - rhs.0)
    }
}

impl AddAssign for Volume {
    fn add_assign(&mut self, rhs: Volume) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Volume {
    fn sub_assign(&mut self, rhs: Volume) {
        self.0 -= rhs.0;
    }
}

impl Mul<f64> for Volume {
    type Output = Volume;
    fn mul(self, rhs: f64) -> Volume {
        Volume(self.0 * rhs)
    }
}

impl Div<f64> for Volume {
    type Output = Volume;
    fn div(self, rhs: f64) -> Volume {
        Volume(self.0 / rhs)
    }
}

impl Sum for Volume {
    fn sum<I: Iterator<Item = Volume>>(iter: I) -> Volume {
        iter.fold(Volume::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Volume> for Volume {
    fn sum<I: Iterator<Item = &'a Volume>>(iter: I) -> Volume {
        iter.copied().sum()
    }
}

/// Split `vol` into the fewest equal parts that each fit within `[min, max]`.
///
/// Returns `[vol]` unchanged when it already fits. Fails with
/// [`PlanError::VolumeTooSmall`] when `vol` is below `min`, and with
/// [`PlanError::VolumeUnsplittable`] when equal parts would fall below `min`
/// (only possible when `max < 2 * min`).
pub fn split_volume(vol: Volume, min: Volume, max: Volume, eps: f64) -> PlanResult<Vec<Volume>> {
    if vol.less_than(min, eps) {
        return Err(PlanError::VolumeTooSmall { volume: vol, min });
    }
    if !vol.greater_than(max, eps) {
        return Ok(vec![vol]);
    }
    if max.as_ul() <= 0.0 {
        return Err(PlanError::VolumeUnsplittable {
            volume: vol,
            min,
            max,
        });
    }

    let n = ((vol.as_ul() - eps) / max.as_ul()).ceil().max(1.0);
    let part = vol / n;
    if part.less_than(min, eps) || part.greater_than(max, eps) {
        return Err(PlanError::VolumeUnsplittable {
            volume: vol,
            min,
            max,
        });
    }
    Ok(vec![part; n as usize])
}

/// Split each channel's volume and re-pack the pieces into parallel rounds.
///
/// The result is indexed `rounds[round][channel]`. Channels whose input volume is
/// zero do not participate; channels that need fewer rounds than the longest one are
/// padded with [`Volume::ZERO`].
pub fn split_multi(
    vols: &[Volume],
    min: Volume,
    max: Volume,
    eps: f64,
) -> PlanResult<Vec<Vec<Volume>>> {
    let per_channel = vols
        .iter()
        .map(|v| {
            if v.is_zero(eps) {
                Ok(Vec::new())
            } else {
                split_volume(*v, min, max, eps)
            }
        })
        .collect::<PlanResult<Vec<_>>>()?;

    let n_rounds = per_channel.iter().map(Vec::len).max().unwrap_or(0);
    let rounds = (0..n_rounds)
        .map(|round| {
            per_channel
                .iter()
                .map(|parts| parts.get(round).copied().unwrap_or(Volume::ZERO))
                .collect()
        })
        .collect();
    Ok(rounds)
}
