//! # Tool name mapping
//!
//! Backends restrict tool names (character set, leading character, length).
//! [`ToolNameMapping`] assigns every canonical name a wire name that satisfies
//! a [`NamePolicy`] and is unique within the request, and restores canonical
//! names on the way back. A mapping lives for exactly one request.
//!
//! Collision handling: normalise, then append `_<hash>`, then an
//! incrementing numeric suffix until the name is free.

use std::collections::{HashMap, HashSet};

use switchboard_core::{ContentBlock, Message, MessageContent, ToolDefinition};
use tracing::warn;

/// Constraints a backend places on tool names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NamePolicy {
    /// Maximum length in bytes (all legal characters are ASCII).
    pub max_len: usize,
    /// Punctuation allowed besides ASCII letters and digits.
    pub extra_chars: &'static str,
    /// Whether the first character must be a letter or underscore.
    pub leading_letter: bool,
}

impl NamePolicy {
    /// `^[a-zA-Z0-9_-]{1,64}$`
    pub const ANTHROPIC: Self = Self {
        max_len: 64,
        extra_chars: "_-",
        leading_letter: false,
    };
    /// `^[a-zA-Z0-9_-]{1,64}$`
    pub const OPENAI: Self = Self {
        max_len: 64,
        extra_chars: "_-",
        leading_letter: false,
    };
    /// Letters, digits, `_ . : -`, starting with a letter or underscore, at most 64.
    pub const GEMINI: Self = Self {
        max_len: 64,
        extra_chars: "_.:-",
        leading_letter: true,
    };
    /// `[a-zA-Z0-9_-]+`, at most 64.
    pub const BEDROCK: Self = Self {
        max_len: 64,
        extra_chars: "_-",
        leading_letter: false,
    };

    fn allows(&self, c: char) -> bool {
        c.is_ascii_alphanumeric() || self.extra_chars.contains(c)
    }

    /// Whether `name` already satisfies the policy.
    pub fn is_legal(&self, name: &str) -> bool {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        if self.leading_letter && !(first.is_ascii_alphabetic() || first == '_') {
            return false;
        }
        name.len() <= self.max_len && self.allows(first) && chars.all(|c| self.allows(c))
    }

    /// Replace illegal characters with `_`, fix the leading character, truncate.
    pub fn normalize(&self, name: &str) -> String {
        let mut out: String = name.chars().map(|c| if self.allows(c) { c } else { '_' }).collect();
        if out.is_empty() {
            out = format!("tool_{}", short_hash(name));
        }
        if self.leading_letter && !out.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            out.insert(0, '_');
        }
        out.truncate(self.max_len);
        out
    }
}

/// 32-bit FNV-1a of `input`, rendered in base 36.
pub fn short_hash(input: &str) -> String {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let mut hash = OFFSET;
    for byte in input.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    to_base36(hash)
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(7);
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

fn with_suffix(base: &str, suffix: &str, max_len: usize) -> String {
    let keep = max_len.saturating_sub(suffix.len()).min(base.len());
    format!("{}{suffix}", &base[..keep])
}

/// Per-request canonical ↔ wire name map.
#[derive(Clone, Debug)]
pub struct ToolNameMapping {
    policy: NamePolicy,
    to_wire: HashMap<String, String>,
    to_canonical: HashMap<String, String>,
}

impl ToolNameMapping {
    /// Assign wire names for `tools` under `policy`.
    pub fn new(tools: &[ToolDefinition], policy: NamePolicy) -> Self {
        Self::from_names(tools.iter().map(|t| t.name.as_str()), policy)
    }

    /// Assign wire names for bare names.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>, policy: NamePolicy) -> Self {
        let mut mapping = Self {
            policy,
            to_wire: HashMap::new(),
            to_canonical: HashMap::new(),
        };
        let mut used = HashSet::new();

        for name in names {
            if mapping.to_wire.contains_key(name) {
                continue;
            }
            let mut candidate = policy.normalize(name);
            if used.contains(&candidate) {
                let hashed = with_suffix(&candidate, &format!("_{}", short_hash(name)), policy.max_len);
                candidate = hashed.clone();
                let mut n = 2u32;
                while used.contains(&candidate) {
                    candidate = with_suffix(&hashed, &format!("_{n}"), policy.max_len);
                    n += 1;
                }
            }
            let _ = used.insert(candidate.clone());
            let _ = mapping.to_canonical.insert(candidate.clone(), name.to_string());
            let _ = mapping.to_wire.insert(name.to_string(), candidate);
        }
        mapping
    }

    /// An empty mapping; names pass through normalisation only.
    pub fn empty(policy: NamePolicy) -> Self {
        Self::from_names(std::iter::empty(), policy)
    }

    /// Wire name for `canonical`.
    ///
    /// Names outside the offered tool list (e.g. from older turns) are
    /// normalised without collision handling.
    pub fn wire_name(&self, canonical: &str) -> String {
        self.to_wire
            .get(canonical)
            .cloned()
            .unwrap_or_else(|| self.policy.normalize(canonical))
    }

    /// Canonical name for `wire`; unknown names pass through unchanged.
    pub fn canonical_name(&self, wire: &str) -> String {
        self.to_canonical
            .get(wire)
            .cloned()
            .unwrap_or_else(|| wire.to_string())
    }

    /// Number of mapped tools.
    pub fn len(&self) -> usize {
        self.to_wire.len()
    }

    /// Whether no tools are mapped.
    pub fn is_empty(&self) -> bool {
        self.to_wire.is_empty()
    }

    /// All assigned wire names.
    pub fn wire_names(&self) -> impl Iterator<Item = &str> {
        self.to_canonical.keys().map(String::as_str)
    }
}

/// Canonical name of the tool call `call_id`, looked up in the conversation.
///
/// Returns an empty string when no earlier call carries that id, which
/// happens with truncated histories. The miss is logged.
pub fn name_for_call(messages: &[Message], call_id: &str) -> String {
    let found = messages.iter().rev().find_map(|message| match &message.content {
        MessageContent::Blocks(blocks) => blocks.iter().find_map(|block| match block {
            ContentBlock::ToolCall { id, name, .. } if id == call_id => Some(name.clone()),
            _ => None,
        }),
        MessageContent::Text(_) => None,
    });
    found.unwrap_or_else(|| {
        warn!(call_id, "tool result references an unknown tool call; using empty tool name");
        String::new()
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_core::Role;

    #[test]
    fn fnv1a_known_values() {
        // FNV-1a("") is the offset basis 0x811c9dc5 = 2166136261
        assert_eq!(short_hash(""), to_base36(2_166_136_261));
        // FNV-1a("a") = 0xe40c292c
        assert_eq!(short_hash("a"), to_base36(0xe40c_292c));
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn legal_names_pass_through() {
        let m = ToolNameMapping::from_names(["read_file", "web-search"], NamePolicy::OPENAI);
        assert_eq!(m.wire_name("read_file"), "read_file");
        assert_eq!(m.wire_name("web-search"), "web-search");
    }

    #[test]
    fn illegal_characters_become_underscores() {
        let m = ToolNameMapping::from_names(["mcp.server/tool name"], NamePolicy::ANTHROPIC);
        assert_eq!(m.wire_name("mcp.server/tool name"), "mcp_server_tool_name");
        assert_eq!(m.canonical_name("mcp_server_tool_name"), "mcp.server/tool name");
    }

    #[test]
    fn gemini_keeps_dots_and_fixes_leading_digit() {
        let m = ToolNameMapping::from_names(["ns.tool", "3d_render"], NamePolicy::GEMINI);
        assert_eq!(m.wire_name("ns.tool"), "ns.tool");
        assert_eq!(m.wire_name("3d_render"), "_3d_render");
    }

    #[test]
    fn empty_name_gets_hashed_placeholder() {
        let m = ToolNameMapping::from_names([""], NamePolicy::OPENAI);
        assert_eq!(m.wire_name(""), format!("tool_{}", short_hash("")));
    }

    #[test]
    fn collisions_get_hash_suffix() {
        let m = ToolNameMapping::from_names(["a.b", "a/b", "a b"], NamePolicy::OPENAI);
        assert_eq!(m.wire_name("a.b"), "a_b");
        assert_eq!(m.wire_name("a/b"), format!("a_b_{}", short_hash("a/b")));
        assert_eq!(m.wire_name("a b"), format!("a_b_{}", short_hash("a b")));
        let distinct: HashSet<_> = m.wire_names().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn hashed_name_collision_adds_hash_of_colliding_name() {
        let second = format!("x_{}", short_hash("x?"));
        let m = ToolNameMapping::from_names(["x_", "x?", second.as_str()], NamePolicy::OPENAI);
        assert_eq!(m.wire_name("x?"), second);
        assert_eq!(m.wire_name(&second), format!("{second}_{}", short_hash(&second)));
    }

    #[test]
    fn numeric_suffix_when_hashed_name_is_taken() {
        // "q?" normalises to "q_" (taken), then to "q_<hash>" (also taken)
        let squatter = format!("q_{}", short_hash("q?"));
        let m = ToolNameMapping::from_names([squatter.as_str(), "q_", "q?"], NamePolicy::OPENAI);
        assert_eq!(m.wire_name(&squatter), squatter);
        assert_eq!(m.wire_name("q_"), "q_");
        assert_eq!(m.wire_name("q?"), format!("{squatter}_2"));
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn long_names_truncated_within_limit() {
        let long_a = format!("{}a", "n".repeat(80));
        let long_b = format!("{}b", "n".repeat(80));
        let m = ToolNameMapping::from_names([long_a.as_str(), long_b.as_str()], NamePolicy::OPENAI);
        let a = m.wire_name(&long_a);
        let b = m.wire_name(&long_b);
        assert!(a.len() <= 64 && b.len() <= 64);
        assert_ne!(a, b);
        assert!(NamePolicy::OPENAI.is_legal(&a));
        assert!(NamePolicy::OPENAI.is_legal(&b));
    }

    #[test]
    fn unknown_wire_name_passes_through() {
        let m = ToolNameMapping::empty(NamePolicy::OPENAI);
        assert_eq!(m.canonical_name("mystery"), "mystery");
        assert_eq!(m.wire_name("x.y"), "x_y");
        assert!(m.is_empty());
    }

    #[test]
    fn name_for_call_finds_originating_call() {
        let history = vec![
            Message::with_blocks(Role::Assistant, vec![ContentBlock::tool_call("c1", "read", json!({}))]),
            Message::with_blocks(Role::User, vec![ContentBlock::tool_result("c1", "data", false)]),
        ];
        assert_eq!(name_for_call(&history, "c1"), "read");
        assert_eq!(name_for_call(&history, "missing"), "");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn policy() -> impl Strategy<Value = NamePolicy> {
            prop_oneof![
                Just(NamePolicy::ANTHROPIC),
                Just(NamePolicy::OPENAI),
                Just(NamePolicy::GEMINI),
                Just(NamePolicy::BEDROCK),
            ]
        }

        proptest! {
            #[test]
            fn mapped_names_are_distinct_and_legal(
                names in prop::collection::hash_set("[a-c./ _-]{0,6}|[a-z]{60,70}", 1..24),
                policy in policy(),
            ) {
                let names: Vec<String> = names.into_iter().collect();
                let m = ToolNameMapping::from_names(names.iter().map(String::as_str), policy);
                let wire: HashSet<String> = names.iter().map(|n| m.wire_name(n)).collect();
                prop_assert_eq!(wire.len(), names.len());
                for w in &wire {
                    prop_assert!(policy.is_legal(w), "illegal wire name {w:?}");
                }
                for n in &names {
                    prop_assert_eq!(&m.canonical_name(&m.wire_name(n)), n);
                }
            }
        }
    }
}
