//! Stable record IDs derived from content hashes.
//!
//! Analysis output must be byte-identical across runs given the same inputs
//! and clock, so IDs are blake3 hashes of the record's identifying parts
//! rather than random UUIDs.

/// Build a stable `prefix-<hex>` id from the given parts.
///
/// Parts are joined with a separator byte before hashing so that
/// `["ab", "c"]` and `["a", "bc"]` produce different ids.
pub fn stable_id(prefix: &str, parts: &[&str]) -> String {
  let mut hasher = blake3::Hasher::new();
  for part in parts {
    hasher.update(part.as_bytes());
    hasher.update(b"|");
  }
  let hex = hasher.finalize().to_hex();
  format!("{}-{}", prefix, &hex[..16])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn same_parts_same_id() {
    assert_eq!(stable_id("log", &["a", "b"]), stable_id("log", &["a", "b"]));
  }

  #[test]
  fn boundary_shifts_change_id() {
    assert_ne!(stable_id("log", &["ab", "c"]), stable_id("log", &["a", "bc"]));
  }

  #[test]
  fn id_shape() {
    let id = stable_id("cor", &["x"]);
    assert!(id.starts_with("cor-"));
    assert_eq!(id.len(), "cor-".len() + 16);
    assert!(id["cor-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
  }
}
