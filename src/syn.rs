use serde::{Deserialize, Serialize};

/// Weight, threshold and the four delay components of one synapse type.
///
/// Defaults: all delays 0, weight 1, threshold 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SynapseProperties {
    pub internal_delay: f64,
    pub pre_delay: f64,
    pub post_delay: f64,
    pub prop_delay: f64,
    pub weight: f64,
    pub threshold: f64,
}

impl Default for SynapseProperties {
    fn default() -> Self {
        Self {
            internal_delay: 0.0,
            pre_delay: 0.0,
            post_delay: 0.0,
            prop_delay: 0.0,
            weight: 1.0,
            threshold: 0.0,
        }
    }
}

impl SynapseProperties {
    /// Scalar delay as seen by simulators that only know one delay.
    pub fn total_delay(&self) -> f64 {
        self.internal_delay + self.pre_delay + self.post_delay + self.prop_delay
    }

    pub fn get(&self, field: SynapseField) -> f64 {
        match field {
            SynapseField::InternalDelay => self.internal_delay,
            SynapseField::PreDelay => self.pre_delay,
            SynapseField::PostDelay => self.post_delay,
            SynapseField::PropDelay => self.prop_delay,
            SynapseField::Weight => self.weight,
            SynapseField::Threshold => self.threshold,
        }
    }

    pub fn set(&mut self, field: SynapseField, value: f64) {
        let slot = match field {
            SynapseField::InternalDelay => &mut self.internal_delay,
            SynapseField::PreDelay => &mut self.pre_delay,
            SynapseField::PostDelay => &mut self.post_delay,
            SynapseField::PropDelay => &mut self.prop_delay,
            SynapseField::Weight => &mut self.weight,
            SynapseField::Threshold => &mut self.threshold,
        };
        *slot = value;
    }

    /// Set a field by its schema attribute name; false if the name is not a
    /// synapse property.
    pub fn set_attr(&mut self, name: &str, value: f64) -> bool {
        match SynapseField::from_attr(name) {
            Some(field) => {
                self.set(field, value);
                true
            }
            None => false,
        }
    }

    /// Fields that differ from `other`, in schema order.
    pub fn diff(&self, other: &SynapseProperties) -> Vec<(SynapseField, f64)> {
        SynapseField::ALL
            .iter()
            .filter(|f| self.get(**f) != other.get(**f))
            .map(|f| (*f, self.get(*f)))
            .collect()
    }
}

/// Property table for [`SynapseProperties`]; shared by both decoders and
/// both encoders so attribute names live in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SynapseField {
    InternalDelay,
    PreDelay,
    PostDelay,
    PropDelay,
    Weight,
    Threshold,
}

impl SynapseField {
    pub const ALL: [SynapseField; 6] = [
        SynapseField::InternalDelay,
        SynapseField::PreDelay,
        SynapseField::PostDelay,
        SynapseField::PropDelay,
        SynapseField::Weight,
        SynapseField::Threshold,
    ];

    pub fn attr_name(&self) -> &'static str {
        match self {
            SynapseField::InternalDelay => "internal_delay",
            SynapseField::PreDelay => "pre_delay",
            SynapseField::PostDelay => "post_delay",
            SynapseField::PropDelay => "prop_delay",
            SynapseField::Weight => "weight",
            SynapseField::Threshold => "threshold",
        }
    }

    pub fn from_attr(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.attr_name() == name)
    }
}
