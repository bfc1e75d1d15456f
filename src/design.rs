//! Design variables.
//!
//! Owned by the optimization driver outside this engine; kernels read the
//! current values during assembly. Every mutation bumps a revision
//! counter so a `SolutionState` computed against stale values can be
//! detected instead of silently reused.

/// One design variable: current value and box bounds.
#[derive(Debug, Clone, Copy)]
pub struct DesignVariable {
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

/// The full design vector with a revision counter.
#[derive(Debug, Clone)]
pub struct DesignVector {
    vars: Vec<DesignVariable>,
    revision: u64,
}

impl DesignVector {
    /// Unbounded variables at the given values
    pub fn new(values: &[f64]) -> Self {
        let vars = values
            .iter()
            .map(|&v| DesignVariable { value: v, lower: f64::NEG_INFINITY, upper: f64::INFINITY })
            .collect();
        Self { vars, revision: 0 }
    }

    pub fn with_bounds(values: &[f64], lower: &[f64], upper: &[f64]) -> Self {
        debug_assert_eq!(values.len(), lower.len());
        debug_assert_eq!(values.len(), upper.len());
        let vars = values
            .iter()
            .zip(lower.iter().zip(upper.iter()))
            .map(|(&v, (&lo, &hi))| DesignVariable { value: v, lower: lo, upper: hi })
            .collect();
        Self { vars, revision: 0 }
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn value(&self, idx: usize) -> f64 {
        self.vars[idx].value
    }

    pub fn values(&self) -> Vec<f64> {
        self.vars.iter().map(|v| v.value).collect()
    }

    pub fn variable(&self, idx: usize) -> &DesignVariable {
        &self.vars[idx]
    }

    /// Set a variable, clamped to its bounds; invalidates prior solutions.
    pub fn set(&mut self, idx: usize, value: f64) {
        let var = &mut self.vars[idx];
        var.value = value.clamp(var.lower, var.upper);
        self.revision += 1;
    }

    /// Monotone counter identifying the current design state
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_bumps_revision() {
        let mut design = DesignVector::new(&[1.0, 2.0]);
        assert_eq!(design.revision(), 0);
        design.set(0, 1.5);
        assert_eq!(design.revision(), 1);
        assert_eq!(design.value(0), 1.5);
    }

    #[test]
    fn test_set_clamps_to_bounds() {
        let mut design = DesignVector::with_bounds(&[1.0], &[0.5], &[2.0]);
        design.set(0, 10.0);
        assert_eq!(design.value(0), 2.0);
        design.set(0, -1.0);
        assert_eq!(design.value(0), 0.5);
    }
}
