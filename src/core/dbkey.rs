// src/core/dbkey.rs

//! Deterministic prefixed byte-key construction over the embedded ordered
//! KV store (spec §4.1). Builders are value types: every `with_*` call
//! returns a new, appended builder without mutating the caller's, which
//! makes a single shared root builder safe to use concurrently.

/// One-byte tag identifying the owner of a key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    RuleList = 0,
    LeakyBucket = 1,
    FileSendRatio = 2,
    RequestFrequency = 3,
}

/// One-byte sub-tag partitioning a single analyzer's key range into its
/// record families (e.g. current / historic / file-size / ip-marker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubTag {
    Current = 0,
    Historic = 1,
    FileSize = 2,
    IpMarker = 3,
}

/// An object that can contribute a fixed-length key segment. Variable-length
/// tails (URLs, etc.) are only ever appended by the caller after all
/// fixed-length segments, never embedded before one.
pub trait KeyObject {
    fn db_key(&self) -> Vec<u8>;
}

#[derive(Debug, Clone, Default)]
pub struct KeyBuilder {
    segments: Vec<u8>,
}

impl KeyBuilder {
    pub fn new() -> Self {
        KeyBuilder::default()
    }

    #[must_use]
    pub fn with_tag(&self, tag: Tag) -> Self {
        let mut segments = self.segments.clone();
        segments.push(tag as u8);
        KeyBuilder { segments }
    }

    #[must_use]
    pub fn with_subtag(&self, sub: SubTag) -> Self {
        let mut segments = self.segments.clone();
        segments.push(sub as u8);
        KeyBuilder { segments }
    }

    #[must_use]
    pub fn with_object(&self, obj: &dyn KeyObject) -> Self {
        let mut segments = self.segments.clone();
        segments.extend_from_slice(&obj.db_key());
        KeyBuilder { segments }
    }

    #[must_use]
    pub fn with_bytes(&self, bytes: &[u8]) -> Self {
        let mut segments = self.segments.clone();
        segments.extend_from_slice(bytes);
        KeyBuilder { segments }
    }

    pub fn build(&self) -> Vec<u8> {
        self.segments.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_calls_do_not_mutate_caller() {
        let root = KeyBuilder::new().with_tag(Tag::LeakyBucket);
        let a = root.with_subtag(SubTag::Current);
        let b = root.with_subtag(SubTag::Historic);
        assert_eq!(root.build(), vec![Tag::LeakyBucket as u8]);
        assert_ne!(a.build(), b.build());
    }
}
