// spacefn Layer Mapping
// Static lookup table consulted while the modifier key holds the layer

use std::collections::HashMap;
use std::fmt;

use crate::Key;

/// Result of a layer lookup: the key to emit, and whether a synthetic
/// shift must bracket it (symbol-layer keys that need a shifted glyph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappedKey {
    pub key: Key,
    pub needs_shift: bool,
}

impl MappedKey {
    /// A mapping emitted as-is
    pub fn plain(key: Key) -> Self {
        Self {
            key,
            needs_shift: false,
        }
    }

    /// A mapping bracketed by the synthetic shift key
    pub fn shifted(key: Key) -> Self {
        Self {
            key,
            needs_shift: true,
        }
    }
}

impl From<Key> for MappedKey {
    fn from(key: Key) -> Self {
        MappedKey::plain(key)
    }
}

impl fmt::Display for MappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.needs_shift {
            write!(f, "Shift+{}", self.key)
        } else {
            write!(f, "{}", self.key)
        }
    }
}

/// Immutable layer table: raw key -> mapped key.
///
/// Lookups are total; `None` means the key has no layer mapping and is
/// treated as an ordinary key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyMapTable {
    mappings: HashMap<Key, MappedKey>,
}

impl KeyMapTable {
    /// Create a table from explicit mappings
    pub fn new(mappings: HashMap<Key, MappedKey>) -> Self {
        Self { mappings }
    }

    /// The compiled-in navigation/symbol layer (Colemak-friendly arrows on
    /// H/Y/N/U, digits on the left hand, paging and home/end on the right).
    pub fn default_layer() -> Self {
        let entries = [
            (Key::H, MappedKey::plain(Key::LEFT)),
            (Key::Y, MappedKey::plain(Key::DOWN)),
            (Key::N, MappedKey::plain(Key::UP)),
            (Key::U, MappedKey::plain(Key::RIGHT)),
            (Key::Z, MappedKey::plain(Key::KEY_0)),
            (Key::X, MappedKey::plain(Key::KEY_1)),
            (Key::C, MappedKey::plain(Key::KEY_2)),
            (Key::V, MappedKey::plain(Key::KEY_3)),
            (Key::CAPSLOCK, MappedKey::plain(Key::SLASH)),
            (Key::A, MappedKey::plain(Key::MINUS)),
            (Key::S, MappedKey::plain(Key::KEY_4)),
            (Key::D, MappedKey::plain(Key::KEY_5)),
            (Key::F, MappedKey::plain(Key::KEY_6)),
            (Key::TAB, MappedKey::plain(Key::GRAVE)),
            (Key::Q, MappedKey::plain(Key::EQUAL)),
            (Key::W, MappedKey::plain(Key::KEY_7)),
            (Key::E, MappedKey::plain(Key::KEY_8)),
            (Key::R, MappedKey::plain(Key::KEY_9)),
            (Key::L, MappedKey::shifted(Key::KEY_9)),
            (Key::SEMICOLON, MappedKey::shifted(Key::KEY_0)),
            (Key::B, MappedKey::plain(Key::PAGE_DOWN)),
            (Key::T, MappedKey::plain(Key::PAGE_UP)),
            (Key::COMMA, MappedKey::plain(Key::HOME)),
            (Key::DOT, MappedKey::plain(Key::END)),
        ];
        Self {
            mappings: entries.into_iter().collect(),
        }
    }

    /// Look up the layer mapping for a raw key
    pub fn lookup(&self, key: Key) -> Option<MappedKey> {
        self.mappings.get(&key).copied()
    }

    /// Lookup falling back to the raw key, unshifted
    pub fn resolve(&self, key: Key) -> MappedKey {
        self.lookup(key).unwrap_or_else(|| MappedKey::plain(key))
    }

    /// Number of mapped keys
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the table maps nothing
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Every key the layer can emit, for declaring virtual device capabilities
    pub fn output_keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.mappings.values().map(|mapped| mapped.key)
    }

    /// Whether any mapping requires the synthetic shift key
    pub fn uses_shift(&self) -> bool {
        self.mappings.values().any(|mapped| mapped.needs_shift)
    }
}
