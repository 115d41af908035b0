//! Data kinds stored by vaults.
//!
//! Immutable data is named by the SHA256 of its content. Structured and appendable data carry
//! their own name and a version; a mutation is only accepted from a valid successor.

use crate::codec::base64_bytes;
use crate::error::MutationError;
use crate::xor_name::XorName;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum size of an immutable chunk's content.
pub const MAX_IMMUTABLE_DATA_SIZE: usize = 1024 * 1024;

/// Maximum serialised size of structured and appendable data.
pub const MAX_MUTABLE_DATA_SIZE: usize = 100 * 1024;

/// Identifies a piece of data independent of its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataIdentifier {
    Immutable(XorName),
    Structured(XorName, u64),
    Appendable(XorName),
}

/// A data identifier paired with a version. Immutable data always has version 0.
pub type IdAndVersion = (DataIdentifier, u64);

/// Whether `next` directly follows `current`. The last version has no successor.
pub fn is_next_version(current: u64, next: u64) -> bool {
    current.checked_add(1) == Some(next)
}

impl DataIdentifier {
    /// The name in the XOR space that decides which close group is responsible.
    pub fn name(&self) -> XorName {
        match *self {
            DataIdentifier::Immutable(name) | DataIdentifier::Appendable(name) => name,
            DataIdentifier::Structured(name, type_tag) => {
                let mut content = Vec::with_capacity(40);
                content.extend_from_slice(&name.0);
                content.extend_from_slice(&type_tag.to_be_bytes());
                XorName::from_content(&content)
            }
        }
    }

    /// File-system friendly key, unique per identifier.
    pub fn storage_key(&self) -> String {
        match self {
            DataIdentifier::Immutable(name) => format!("imm-{}", name.to_hex()),
            DataIdentifier::Structured(name, type_tag) => {
                format!("sd-{}-{}", name.to_hex(), type_tag)
            }
            DataIdentifier::Appendable(name) => format!("ad-{}", name.to_hex()),
        }
    }

    pub fn is_immutable(&self) -> bool {
        matches!(self, DataIdentifier::Immutable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmutableData {
    #[serde(with = "base64_bytes")]
    value: Bytes,
}

impl ImmutableData {
    pub fn new(value: Bytes) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn name(&self) -> XorName {
        XorName::from_content(&self.value)
    }

    pub fn identifier(&self) -> DataIdentifier {
        DataIdentifier::Immutable(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredData {
    pub type_tag: u64,
    pub name: XorName,
    pub version: u64,
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
    pub owners: BTreeSet<XorName>,
    /// The owner claiming authorship of this version.
    #[serde(default)]
    pub signed_by: Option<XorName>,
    #[serde(default)]
    pub deleted: bool,
}

impl StructuredData {
    pub fn new(
        type_tag: u64,
        name: XorName,
        version: u64,
        data: Bytes,
        owners: BTreeSet<XorName>,
        signed_by: Option<XorName>,
    ) -> Self {
        Self {
            type_tag,
            name,
            version,
            data,
            owners,
            signed_by,
            deleted: false,
        }
    }

    pub fn identifier(&self) -> DataIdentifier {
        DataIdentifier::Structured(self.name, self.type_tag)
    }

    fn check_successor(&self, other: &StructuredData) -> Result<(), MutationError> {
        if self.deleted {
            return Err(MutationError::InvalidOperation);
        }
        if other.identifier() != self.identifier() || !is_next_version(self.version, other.version) {
            return Err(MutationError::InvalidSuccessor);
        }
        match other.signed_by {
            Some(owner) if self.owners.contains(&owner) => Ok(()),
            _ => Err(MutationError::InvalidSuccessor),
        }
    }

    /// Replaces `self` with `other` if it is a valid successor.
    pub fn replace_with_other(&mut self, other: StructuredData) -> Result<(), MutationError> {
        self.check_successor(&other)?;
        *self = other;
        self.deleted = false;
        Ok(())
    }

    /// Turns `self` into a tombstone at `other`'s version if `other` is a valid successor.
    pub fn delete_if_valid_successor(&mut self, other: &StructuredData) -> Result<(), MutationError> {
        self.check_successor(other)?;
        self.version = other.version;
        self.signed_by = other.signed_by;
        self.data = Bytes::new();
        self.deleted = true;
        Ok(())
    }
}

/// Decides who may append to an appendable data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    BlackList(BTreeSet<XorName>),
    WhiteList(BTreeSet<XorName>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::BlackList(BTreeSet::new())
    }
}

impl Filter {
    pub fn allows(&self, appender: &XorName) -> bool {
        match self {
            Filter::BlackList(names) => !names.contains(appender),
            Filter::WhiteList(names) => names.contains(appender),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppendedItem {
    pub appender: XorName,
    #[serde(with = "base64_bytes")]
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendableData {
    pub name: XorName,
    pub version: u64,
    pub owners: BTreeSet<XorName>,
    #[serde(default)]
    pub signed_by: Option<XorName>,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub items: BTreeSet<AppendedItem>,
    #[serde(default)]
    pub deleted: bool,
}

impl AppendableData {
    pub fn new(name: XorName, version: u64, owners: BTreeSet<XorName>, filter: Filter) -> Self {
        Self {
            name,
            version,
            owners,
            signed_by: None,
            filter,
            items: BTreeSet::new(),
            deleted: false,
        }
    }

    pub fn identifier(&self) -> DataIdentifier {
        DataIdentifier::Appendable(self.name)
    }

    /// Applies an owner's update: replaces owners and filter, merges items.
    pub fn update_with_other(&mut self, other: AppendableData) -> Result<(), MutationError> {
        if self.deleted {
            return Err(MutationError::InvalidOperation);
        }
        if other.name != self.name || !is_next_version(self.version, other.version) {
            return Err(MutationError::InvalidSuccessor);
        }
        match other.signed_by {
            Some(owner) if self.owners.contains(&owner) => {}
            _ => return Err(MutationError::InvalidSuccessor),
        }
        self.version = other.version;
        self.owners = other.owners;
        self.signed_by = other.signed_by;
        self.filter = other.filter;
        self.items.extend(other.items);
        Ok(())
    }

    /// Appends the wrapped item. Returns `false` if the filter or version rejects it.
    pub fn apply_wrapper(&mut self, wrapper: AppendWrapper) -> bool {
        if self.deleted || wrapper.version != self.version {
            return false;
        }
        if !self.filter.allows(&wrapper.item.appender) {
            return false;
        }
        let _ = self.items.insert(wrapper.item);
        true
    }
}

/// A request to append `item` to the appendable data `name` at `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendWrapper {
    pub name: XorName,
    pub version: u64,
    pub item: AppendedItem,
}

impl AppendWrapper {
    pub fn identifier(&self) -> DataIdentifier {
        DataIdentifier::Appendable(self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Data {
    Immutable(ImmutableData),
    Structured(StructuredData),
    Appendable(AppendableData),
}

impl Data {
    pub fn identifier(&self) -> DataIdentifier {
        match self {
            Data::Immutable(data) => data.identifier(),
            Data::Structured(data) => data.identifier(),
            Data::Appendable(data) => data.identifier(),
        }
    }

    /// Routing name of the data.
    pub fn name(&self) -> XorName {
        self.identifier().name()
    }

    pub fn version(&self) -> u64 {
        match self {
            Data::Immutable(_) => 0,
            Data::Structured(data) => data.version,
            Data::Appendable(data) => data.version,
        }
    }

    pub fn id_and_version(&self) -> IdAndVersion {
        (self.identifier(), self.version())
    }

    pub fn validate_size(&self) -> bool {
        match self {
            Data::Immutable(data) => data.value.len() <= MAX_IMMUTABLE_DATA_SIZE,
            Data::Structured(_) | Data::Appendable(_) => serde_json::to_vec(self)
                .map(|bytes| bytes.len() <= MAX_MUTABLE_DATA_SIZE)
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(byte: u8) -> XorName {
        XorName([byte; 32])
    }

    fn structured(version: u64, signer: u8) -> StructuredData {
        StructuredData::new(
            10_001,
            owner(9),
            version,
            Bytes::from(format!("v{}", version)),
            [owner(1)].into_iter().collect(),
            Some(owner(signer)),
        )
    }

    #[test]
    fn test_immutable_name_is_content_hash() {
        let data = ImmutableData::new(Bytes::from_static(b"chunk"));
        assert_eq!(data.name(), XorName::from_content(b"chunk"));
        assert_eq!(Data::Immutable(data.clone()).version(), 0);
        assert_eq!(Data::Immutable(data.clone()).name(), data.name());
    }

    #[test]
    fn test_structured_routing_name_depends_on_type_tag() {
        let a = DataIdentifier::Structured(owner(3), 1);
        let b = DataIdentifier::Structured(owner(3), 2);
        assert_ne!(a.name(), b.name());
        assert_ne!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn test_structured_successor_rules() {
        let mut current = structured(0, 1);
        assert_eq!(
            current.clone().replace_with_other(structured(2, 1)),
            Err(MutationError::InvalidSuccessor)
        );
        assert_eq!(
            current.clone().replace_with_other(structured(1, 7)),
            Err(MutationError::InvalidSuccessor)
        );
        assert!(current.replace_with_other(structured(1, 1)).is_ok());
        assert_eq!(current.version, 1);

        current.delete_if_valid_successor(&structured(2, 1)).unwrap();
        assert!(current.deleted);
        assert!(current.data.is_empty());
        assert_eq!(
            current.replace_with_other(structured(3, 1)),
            Err(MutationError::InvalidOperation)
        );
    }

    #[test]
    fn test_last_version_has_no_successor() {
        assert!(is_next_version(0, 1));
        assert!(!is_next_version(u64::MAX, 0));
        assert!(!is_next_version(u64::MAX, u64::MAX));

        let mut last = structured(u64::MAX, 1);
        assert_eq!(
            last.clone().replace_with_other(structured(0, 1)),
            Err(MutationError::InvalidSuccessor)
        );
        assert_eq!(
            last.delete_if_valid_successor(&structured(0, 1)),
            Err(MutationError::InvalidSuccessor)
        );
        assert_eq!(last.version, u64::MAX);
        assert!(!last.deleted);

        let owners: BTreeSet<_> = [owner(1)].into_iter().collect();
        let mut data = AppendableData::new(owner(4), u64::MAX, owners.clone(), Filter::default());
        let mut rollback = AppendableData::new(owner(4), 0, owners, Filter::default());
        rollback.signed_by = Some(owner(1));
        assert_eq!(
            data.update_with_other(rollback),
            Err(MutationError::InvalidSuccessor)
        );
        assert_eq!(data.version, u64::MAX);
    }

    #[test]
    fn test_appendable_filter_and_update() {
        let owners: BTreeSet<_> = [owner(1)].into_iter().collect();
        let blocked: BTreeSet<_> = [owner(6)].into_iter().collect();
        let mut data = AppendableData::new(owner(4), 0, owners.clone(), Filter::BlackList(blocked));

        let append = |appender: u8, version: u64| AppendWrapper {
            name: owner(4),
            version,
            item: AppendedItem {
                appender: owner(appender),
                payload: Bytes::from_static(b"hi"),
            },
        };

        assert!(data.apply_wrapper(append(2, 0)));
        assert!(!data.apply_wrapper(append(6, 0)));
        assert!(!data.apply_wrapper(append(2, 5)));
        assert_eq!(data.items.len(), 1);

        let mut update = AppendableData::new(owner(4), 1, owners, Filter::default());
        update.signed_by = Some(owner(1));
        update.items.insert(AppendedItem {
            appender: owner(3),
            payload: Bytes::from_static(b"other"),
        });
        data.update_with_other(update).unwrap();
        assert_eq!(data.version, 1);
        assert_eq!(data.items.len(), 2);
        assert!(data.filter.allows(&owner(6)));
    }

    #[test]
    fn test_validate_size() {
        let small = Data::Immutable(ImmutableData::new(Bytes::from(vec![0u8; 10])));
        assert!(small.validate_size());
        let big = Data::Immutable(ImmutableData::new(Bytes::from(vec![0u8; MAX_IMMUTABLE_DATA_SIZE + 1])));
        assert!(!big.validate_size());

        let mut sd = structured(0, 1);
        sd.data = Bytes::from(vec![1u8; MAX_MUTABLE_DATA_SIZE]);
        assert!(!Data::Structured(sd).validate_size());
    }
}
