use serde::Serialize;

/// Interpolation used from a keyframe to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Interpolation {
    Constant,
    Linear,
    Bezier,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Keyframe {
    pub frame: f64,
    pub value: f32,
    pub interpolation: Interpolation,
    pub handle_left: (f64, f32),
    pub handle_right: (f64, f32),
}

/// Animation curve driving one array element of one property.
#[derive(Debug, Clone, Serialize)]
pub struct FCurve {
    pub data_path: String,
    pub array_index: usize,
    pub group: Option<String>,
    keyframes: Vec<Keyframe>,
}

impl FCurve {
    pub fn new(data_path: &str, array_index: usize) -> Self {
        Self {
            data_path: data_path.to_string(),
            array_index,
            group: None,
            keyframes: Vec::new(),
        }
    }

    pub fn with_capacity(data_path: &str, array_index: usize, capacity: usize) -> Self {
        Self {
            keyframes: Vec::with_capacity(capacity),
            ..Self::new(data_path, array_index)
        }
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    /// Inserts a key, keeping keys ordered by frame.
    ///
    /// A key already sitting on `frame` is replaced.
    pub fn insert_keyframe(&mut self, frame: f64, value: f32, interpolation: Interpolation) {
        let key = Keyframe {
            frame,
            value,
            interpolation,
            handle_left: (frame, value),
            handle_right: (frame, value),
        };

        match self
            .keyframes
            .binary_search_by(|existing| existing.frame.total_cmp(&frame))
        {
            Ok(index) => self.keyframes[index] = key,
            Err(index) => self.keyframes.insert(index, key),
        }
    }

    /// Recomputes auto-clamped Bézier handles for every key.
    pub fn recalc_handles(&mut self) {
        let count = self.keyframes.len();
        for index in 0..count {
            let current = self.keyframes[index];
            let prev = index.checked_sub(1).map(|i| self.keyframes[i]);
            let next = self.keyframes.get(index + 1).copied();

            let slope = match (prev, next) {
                (Some(p), Some(n)) => {
                    let is_extreme = (current.value - p.value) * (n.value - current.value) <= 0.0;
                    if is_extreme || n.frame <= p.frame {
                        0.0
                    } else {
                        (n.value - p.value) as f64 / (n.frame - p.frame)
                    }
                }
                _ => 0.0,
            };

            let left_reach = prev
                .map(|p| (current.frame - p.frame) / 3.0)
                .or_else(|| next.map(|n| (n.frame - current.frame) / 3.0))
                .unwrap_or(1.0 / 3.0);
            let right_reach = next
                .map(|n| (n.frame - current.frame) / 3.0)
                .unwrap_or(left_reach);

            let key = &mut self.keyframes[index];
            key.handle_left = (
                current.frame - left_reach,
                current.value - (slope * left_reach) as f32,
            );
            key.handle_right = (
                current.frame + right_reach,
                current.value + (slope * right_reach) as f32,
            );
        }
    }

    /// Evaluates the curve, holding the end values outside the keyed range.
    pub fn evaluate(&self, frame: f64) -> Option<f32> {
        let first = self.keyframes.first()?;
        let last = self.keyframes.last()?;
        if frame <= first.frame {
            return Some(first.value);
        }
        if frame >= last.frame {
            return Some(last.value);
        }

        let next_index = self.keyframes.partition_point(|key| key.frame <= frame);
        let left = self.keyframes[next_index - 1];
        let right = self.keyframes[next_index];

        let value = match left.interpolation {
            Interpolation::Constant => left.value,
            Interpolation::Linear => {
                let t = ((frame - left.frame) / (right.frame - left.frame)) as f32;
                left.value + (right.value - left.value) * t
            }
            Interpolation::Bezier => evaluate_bezier_segment(&left, &right, frame),
        };
        Some(value)
    }
}

fn evaluate_bezier_segment(left: &Keyframe, right: &Keyframe, frame: f64) -> f32 {
    let xs = [left.frame, left.handle_right.0, right.handle_left.0, right.frame];
    let ys = [left.value, left.handle_right.1, right.handle_left.1, right.value];
    let cubic = |p: [f64; 4], t: f64| {
        let u = 1.0 - t;
        u * u * u * p[0] + 3.0 * u * u * t * p[1] + 3.0 * u * t * t * p[2] + t * t * t * p[3]
    };

    // Handles are clamped inside the segment, so x(t) is monotonic.
    let (mut lo, mut hi) = (0.0f64, 1.0f64);
    for _ in 0..32 {
        let mid = 0.5 * (lo + hi);
        if cubic(xs, mid) < frame {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let t = 0.5 * (lo + hi);
    cubic(ys.map(f64::from), t) as f32
}

/// Index of a curve inside its action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CurveId(pub usize);

/// Named collection of curves, optionally organised in channel groups.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub name: String,
    groups: Vec<String>,
    curves: Vec<FCurve>,
}

impl Action {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            groups: Vec::new(),
            curves: Vec::new(),
        }
    }

    /// Adds a channel group unless one with the same name already exists.
    pub fn ensure_group(&mut self, name: &str) {
        if !self.groups.iter().any(|group| group == name) {
            self.groups.push(name.to_string());
        }
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn add_curve(&mut self, curve: FCurve) -> CurveId {
        if let Some(group) = &curve.group {
            let group = group.clone();
            self.ensure_group(&group);
        }
        self.curves.push(curve);
        CurveId(self.curves.len() - 1)
    }

    pub fn curve(&self, id: CurveId) -> &FCurve {
        &self.curves[id.0]
    }

    pub fn curve_mut(&mut self, id: CurveId) -> &mut FCurve {
        &mut self.curves[id.0]
    }

    pub fn curves(&self) -> &[FCurve] {
        &self.curves
    }

    pub fn find_curve(&self, data_path: &str, array_index: usize) -> Option<&FCurve> {
        self.curves
            .iter()
            .find(|curve| curve.data_path == data_path && curve.array_index == array_index)
    }

    /// Union of every keyed frame across all curves, ascending.
    pub fn keyed_frames(&self) -> Vec<f64> {
        let mut frames: Vec<f64> = self
            .curves
            .iter()
            .flat_map(|curve| curve.keyframes.iter().map(|key| key.frame))
            .collect();
        frames.sort_by(f64::total_cmp);
        frames.dedup();
        frames
    }
}
