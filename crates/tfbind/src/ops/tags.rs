//! Tags attached to graph values so optimizers and initializers can find them.

use crate::graph::Output;
use std::collections::HashMap;
use std::fmt;

/// Symbolic label for a constructed value, usually a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarTag {
    /// Updated by optimizers.
    Trainable,
    /// Receives decoupled L1 weight decay.
    DecayL1,
    /// Receives decoupled L2 weight decay.
    DecayL2,
    /// An assignment operation run as part of initialization.
    InitAssign,
    InitZeros,
    InitOnes,
    /// Uniform in `[0, 1)`.
    InitUniform,
    /// Uniform in `[0, 1e-4)`.
    InitEpsUniform,
    /// Truncated normal with mean 0 and stddev 1.
    InitTruncNormal,
    InitHeUniform,
    InitHeNormal,
    InitLecunUniform,
    InitLecunNormal,
    InitXavierUniform,
    InitXavierNormal,
}

impl VarTag {
    /// Initializer tags in the order the init operation processes them.
    pub const INITIALIZERS: [VarTag; 11] = [
        VarTag::InitZeros,
        VarTag::InitOnes,
        VarTag::InitUniform,
        VarTag::InitEpsUniform,
        VarTag::InitTruncNormal,
        VarTag::InitHeUniform,
        VarTag::InitHeNormal,
        VarTag::InitLecunUniform,
        VarTag::InitLecunNormal,
        VarTag::InitXavierUniform,
        VarTag::InitXavierNormal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VarTag::Trainable => "TagTrainable",
            VarTag::DecayL1 => "TagDecayL1",
            VarTag::DecayL2 => "TagDecayL2",
            VarTag::InitAssign => "TagInitAssign",
            VarTag::InitZeros => "TagInitZeros",
            VarTag::InitOnes => "TagInitOnes",
            VarTag::InitUniform => "TagInitUniform",
            VarTag::InitEpsUniform => "TagInitEpsUniform",
            VarTag::InitTruncNormal => "TagInitTruncNormal",
            VarTag::InitHeUniform => "TagInitHeUniform",
            VarTag::InitHeNormal => "TagInitHeNormal",
            VarTag::InitLecunUniform => "TagInitLecunUniform",
            VarTag::InitLecunNormal => "TagInitLecunNormal",
            VarTag::InitXavierUniform => "TagInitXavierUniform",
            VarTag::InitXavierNormal => "TagInitXavierNormal",
        }
    }
}

impl fmt::Display for VarTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tag to values, each list in registration order.
#[derive(Debug, Default)]
pub(crate) struct TagRegistry {
    by_tag: HashMap<VarTag, Vec<Output>>,
}

impl TagRegistry {
    pub(crate) fn tag(&mut self, value: &Output, tags: &[VarTag]) {
        for tag in tags {
            self.by_tag.entry(*tag).or_default().push(value.clone());
        }
    }

    /// Concatenation of the per-tag lists. A value carrying several of the
    /// requested tags appears once per tag.
    pub(crate) fn params(&self, tags: &[VarTag]) -> Vec<Output> {
        let tags = if tags.is_empty() {
            &[VarTag::Trainable][..]
        } else {
            tags
        };
        tags.iter()
            .filter_map(|tag| self.by_tag.get(tag))
            .flat_map(|values| values.iter().cloned())
            .collect()
    }
}
