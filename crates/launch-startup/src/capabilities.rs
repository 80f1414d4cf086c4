use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates capabilities a subsystem reports into the startup gate.
pub enum Capability {
    InstallReferrer,
    Push,
    DeepLink,
    AdId,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::InstallReferrer,
        Capability::Push,
        Capability::DeepLink,
        Capability::AdId,
    ];

    pub const fn bit(self) -> u8 {
        match self {
            Self::InstallReferrer => 1 << 0,
            Self::Push => 1 << 1,
            Self::DeepLink => 1 << 2,
            Self::AdId => 1 << 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InstallReferrer => "InstallReferrer",
            Self::Push => "Push",
            Self::DeepLink => "DeepLink",
            Self::AdId => "AdId",
        }
    }
}

/// Bitset of [`Capability`] values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Sets `capability`; returns true when it was not already present.
    pub fn insert(&mut self, capability: Capability) -> bool {
        let added = !self.contains(capability);
        self.0 |= capability.bit();
        added
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.insert(capability);
        self
    }

    pub fn is_subset_of(self, other: CapabilitySet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL
            .into_iter()
            .filter(move |capability| self.contains(*capability))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::empty(), |set, capability| set.with(capability))
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let names = self.iter().map(Capability::as_str).collect::<Vec<_>>();
        f.write_str(&names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::{Capability, CapabilitySet};

    #[test]
    fn unit_capability_bits_are_stable() {
        assert_eq!(Capability::InstallReferrer.bit(), 1);
        assert_eq!(Capability::Push.bit(), 2);
        assert_eq!(Capability::DeepLink.bit(), 4);
        assert_eq!(Capability::AdId.bit(), 8);
    }

    #[test]
    fn unit_insert_reports_first_set_only() {
        let mut set = CapabilitySet::empty();
        assert!(set.insert(Capability::Push));
        assert!(!set.insert(Capability::Push));
        assert_eq!(set.bits(), 2);
    }

    #[test]
    fn unit_display_lists_names_in_bit_order() {
        let set = [Capability::AdId, Capability::InstallReferrer]
            .into_iter()
            .collect::<CapabilitySet>();
        assert_eq!(set.to_string(), "InstallReferrer, AdId");
        assert_eq!(CapabilitySet::empty().to_string(), "None");
    }

    #[test]
    fn unit_subset_check() {
        let expected = CapabilitySet::empty()
            .with(Capability::Push)
            .with(Capability::DeepLink);
        assert!(CapabilitySet::empty().with(Capability::Push).is_subset_of(expected));
        assert!(!CapabilitySet::empty().with(Capability::AdId).is_subset_of(expected));
    }
}
