use nalgebra::{UnitQuaternion, Vector3};

/// Values that can be blended between two time samples.
pub trait Lerp: Clone {
    /// Blends towards `other`; arrays of different length hold `self`.
    fn lerp(&self, other: &Self, t: f64) -> Self;
}

impl Lerp for Vector3<f32> {
    fn lerp(&self, other: &Self, t: f64) -> Self {
        self + (other - self) * t as f32
    }
}

impl Lerp for UnitQuaternion<f32> {
    fn lerp(&self, other: &Self, t: f64) -> Self {
        self.try_slerp(other, t as f32, 1e-6).unwrap_or(*self)
    }
}

impl Lerp for Vec<f32> {
    fn lerp(&self, other: &Self, t: f64) -> Self {
        if self.len() != other.len() {
            return self.clone();
        }
        let t = t as f32;
        self.iter().zip(other).map(|(a, b)| a + (b - a) * t).collect()
    }
}

impl Lerp for Vec<Vector3<f32>> {
    fn lerp(&self, other: &Self, t: f64) -> Self {
        if self.len() != other.len() {
            return self.clone();
        }
        let t = t as f32;
        self.iter().zip(other).map(|(a, b)| a.lerp(b, t)).collect()
    }
}

impl Lerp for Vec<UnitQuaternion<f32>> {
    fn lerp(&self, other: &Self, t: f64) -> Self {
        if self.len() != other.len() {
            return self.clone();
        }
        let t = t as f32;
        self.iter()
            .zip(other)
            .map(|(a, b)| a.try_slerp(b, t, 1e-6).unwrap_or(*a))
            .collect()
    }
}

/// Attribute value with an optional default and sorted time samples.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSamples<T> {
    default: Option<T>,
    samples: Vec<(f64, T)>,
}

impl<T> Default for TimeSamples<T> {
    fn default() -> Self {
        Self {
            default: None,
            samples: Vec::new(),
        }
    }
}

impl<T: Lerp> TimeSamples<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(value: T) -> Self {
        Self {
            default: Some(value),
            samples: Vec::new(),
        }
    }

    pub fn set_default(&mut self, value: T) {
        self.default = Some(value);
    }

    /// Authors `value` at `time`, replacing an existing sample at that time.
    pub fn insert(&mut self, time: f64, value: T) {
        match self
            .samples
            .binary_search_by(|(existing, _)| existing.total_cmp(&time))
        {
            Ok(index) => self.samples[index].1 = value,
            Err(index) => self.samples.insert(index, (time, value)),
        }
    }

    pub fn is_authored(&self) -> bool {
        self.default.is_some() || !self.samples.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|(time, _)| *time).collect()
    }

    pub fn samples(&self) -> &[(f64, T)] {
        &self.samples
    }

    /// Resolves the value at `time`: linear between samples, held past the
    /// ends, and the default when no samples are authored.
    pub fn value_at(&self, time: f64) -> Option<T> {
        let (Some((first_time, first)), Some((last_time, last))) =
            (self.samples.first(), self.samples.last())
        else {
            return self.default.clone();
        };

        if time <= *first_time {
            return Some(first.clone());
        }
        if time >= *last_time {
            return Some(last.clone());
        }

        let next = self.samples.partition_point(|(sample_time, _)| *sample_time <= time);
        let (left_time, left) = &self.samples[next - 1];
        if *left_time == time {
            return Some(left.clone());
        }
        let (right_time, right) = &self.samples[next];
        let t = (time - left_time) / (right_time - left_time);
        Some(left.lerp(right, t))
    }
}

/// How primvar values map onto mesh elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Constant,
    Uniform,
    Varying,
    Vertex,
    FaceVarying,
}

impl Interpolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interpolation::Constant => "constant",
            Interpolation::Uniform => "uniform",
            Interpolation::Varying => "varying",
            Interpolation::Vertex => "vertex",
            Interpolation::FaceVarying => "faceVarying",
        }
    }
}

/// Flat primvar array with an element size and optional element indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct Primvar<T> {
    pub values: Vec<T>,
    pub element_size: usize,
    pub interpolation: Interpolation,
    pub indices: Option<Vec<i32>>,
}

impl<T: Clone> Primvar<T> {
    pub fn new(values: Vec<T>, element_size: usize, interpolation: Interpolation) -> Self {
        Self {
            values,
            element_size,
            interpolation,
            indices: None,
        }
    }

    /// Expands indexed values into a flat array.
    ///
    /// Returns `None` when an index addresses a missing element.
    pub fn compute_flattened(&self) -> Option<Vec<T>> {
        let Some(indices) = &self.indices else {
            return Some(self.values.clone());
        };

        let element_size = self.element_size.max(1);
        let mut flattened = Vec::with_capacity(indices.len() * element_size);
        for &index in indices {
            let start = usize::try_from(index).ok()? * element_size;
            flattened.extend_from_slice(self.values.get(start..start + element_size)?);
        }
        Some(flattened)
    }
}
