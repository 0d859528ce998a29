use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static UNSAFE_RE: OnceLock<Regex> = OnceLock::new();

pub const MAX_SLUG_LEN: usize = 48;

// git refuses ref components ending in this.
const LOCK_SUFFIX: &str = ".lock";

/// Path- and ref-safe slug for an agent id.
///
/// Runs of characters outside `[A-Za-z0-9._-]` and of two or more `.` become
/// one `-`, leading and trailing `-`/`.` are trimmed and the result is capped
/// at [`MAX_SLUG_LEN`]. If any of that changed the id, or the id ends in
/// `.lock`, the first 8 hex digits of the id's SHA-256 are appended so
/// distinct ids keep distinct slugs:
/// - `agent-1` -> `agent-1`
/// - `../a` -> `a-<hash>`
/// - `a b` -> `a-b-<hash>`
/// - `x.lock` -> `x.lock-<hash>`
pub fn agent_slug(agent_id: &str) -> String {
  let re = UNSAFE_RE.get_or_init(|| Regex::new(r"(?:[^A-Za-z0-9._-]|\.{2,})+").expect("valid regex"));
  let replaced = re.replace_all(agent_id, "-");
  let mut slug = trim(&replaced).to_string();
  if slug.len() > MAX_SLUG_LEN {
    slug.truncate(MAX_SLUG_LEN);
    slug = trim(&slug).to_string();
  }
  if !slug.is_empty() && slug == agent_id && !slug.ends_with(LOCK_SUFFIX) {
    return slug;
  }
  let suffix = short_hash(agent_id);
  if slug.is_empty() {
    suffix
  } else {
    format!("{slug}-{suffix}")
  }
}

fn trim(s: &str) -> &str {
  s.trim_matches(|c| c == '-' || c == '.')
}

fn short_hash(input: &str) -> String {
  let digest = Sha256::digest(input.as_bytes());
  digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn clean_ids_are_kept() {
    assert_eq!(agent_slug("agent-1"), "agent-1");
    assert_eq!(agent_slug("Claude_2.v3"), "Claude_2.v3");
  }

  #[test]
  fn lossy_ids_get_hash_suffix() {
    let s = agent_slug("../a");
    assert!(s.starts_with("a-"), "{s}");
    assert_eq!(s.len(), "a-".len() + 8);
    assert_ne!(s, agent_slug("a"));
    assert_eq!(s, agent_slug("../a"));
  }

  #[test]
  fn unsafe_runs_collapse_to_one_dash() {
    let s = agent_slug("a  /  b");
    assert!(s.starts_with("a-b-"), "{s}");
  }

  #[test]
  fn empty_id_is_hash_only() {
    assert_eq!(agent_slug("").len(), 8);
  }

  #[test]
  fn fully_unsafe_id_is_hash_only() {
    let s = agent_slug("///");
    assert_eq!(s.len(), 8);
    assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn dot_runs_never_survive() {
    let s = agent_slug("a..b");
    assert!(!s.contains(".."), "{s}");
    assert!(s.starts_with("a-b-"), "{s}");
    assert_ne!(s, agent_slug("a-b"));
    assert!(!agent_slug("x/...y").contains(".."));
  }

  #[test]
  fn lock_suffix_is_not_left_at_the_end() {
    let s = agent_slug("x.lock");
    assert!(s.starts_with("x.lock-"), "{s}");
    assert!(!s.ends_with(".lock"));
    assert_ne!(s, agent_slug("x.lock-"));
  }

  #[test]
  fn reflog_syntax_is_rewritten() {
    let s = agent_slug("main@{1}");
    assert!(!s.contains("@{"), "{s}");
    assert!(s.starts_with("main-1-"), "{s}");
  }

  #[test]
  fn long_ids_are_capped() {
    let long = "x".repeat(100);
    let s = agent_slug(&long);
    assert!(s.starts_with(&"x".repeat(MAX_SLUG_LEN)));
    assert_eq!(s.len(), MAX_SLUG_LEN + 9);
    assert_ne!(s, agent_slug(&"x".repeat(101)));
  }

  proptest! {
    #[test]
    fn slugs_are_ref_safe(id in ".{0,80}") {
      let s = agent_slug(&id);
      prop_assert!(!s.is_empty());
      prop_assert!(s.len() <= MAX_SLUG_LEN + 9);
      prop_assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
      prop_assert!(!s.starts_with(['-', '.']));
      prop_assert!(!s.ends_with('.'));
      prop_assert!(!s.contains(".."));
      prop_assert!(!s.ends_with(".lock"));
    }

    #[test]
    fn distinct_ids_give_distinct_slugs(a in "[a-z./ ]{1,12}", b in "[a-z./ ]{1,12}") {
      prop_assume!(a != b);
      prop_assert_ne!(agent_slug(&a), agent_slug(&b));
    }
  }
}
