//! Deterministic content hashing for issues.
//!
//! The hash covers substantive content fields only -- never the ID,
//! timestamps, or lifecycle bookkeeping -- so identical content yields the
//! same fingerprint in every clone of the store. Exporters use it for
//! content-level dedup; the ID service feeds it into hash-ID generation.

use sha2::{Digest, Sha256};

use crate::issue::Issue;

/// Separator byte written between fields so adjacent fields cannot collide.
const SEP: u8 = 0;

/// Computes the SHA-256 hex fingerprint of an issue's content.
pub fn compute_content_hash(issue: &Issue) -> String {
    let mut h = Sha256::new();

    write_str(&mut h, &issue.title);
    write_str(&mut h, &issue.description);
    write_str(&mut h, &issue.design);
    write_str(&mut h, &issue.acceptance_criteria);
    write_str(&mut h, &issue.notes);
    write_str(&mut h, issue.status.as_str());
    write_int(&mut h, issue.priority);
    write_str(&mut h, issue.issue_type.as_str());
    write_str(&mut h, &issue.assignee);
    write_str(&mut h, &issue.owner);
    write_str(&mut h, &issue.created_by);

    write_str_opt(&mut h, issue.external_ref.as_deref());
    write_str(&mut h, &issue.source_system);

    if let Some(ref meta) = issue.metadata {
        write_str(&mut h, meta.get());
    } else {
        h.update([SEP]);
    }

    write_str(&mut h, &issue.sender);
    write_flag(&mut h, issue.ephemeral, "ephemeral");
    write_flag(&mut h, issue.pinned, "pinned");
    write_flag(&mut h, issue.is_template, "template");
    write_flag(&mut h, issue.crystallizes, "crystallizes");

    write_str(&mut h, &issue.mol_type);
    write_str(&mut h, &issue.work_type);
    write_f64_opt(&mut h, issue.quality_score);

    write_str(&mut h, &issue.event_kind);
    write_str(&mut h, &issue.actor);
    write_str(&mut h, &issue.target);
    write_str(&mut h, &issue.payload);

    format!("{:x}", h.finalize())
}

// -- helper writers --------------------------------------------------------

fn write_str(h: &mut Sha256, s: &str) {
    h.update(s.as_bytes());
    h.update([SEP]);
}

fn write_int(h: &mut Sha256, n: i32) {
    h.update(n.to_string().as_bytes());
    h.update([SEP]);
}

fn write_str_opt(h: &mut Sha256, s: Option<&str>) {
    if let Some(s) = s {
        h.update(s.as_bytes());
    }
    h.update([SEP]);
}

fn write_f64_opt(h: &mut Sha256, v: Option<f64>) {
    if let Some(v) = v {
        h.update(format!("{v:.6}").as_bytes());
    }
    h.update([SEP]);
}

fn write_flag(h: &mut Sha256, b: bool, label: &str) {
    if b {
        h.update(label.as_bytes());
    }
    h.update([SEP]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueBuilder;

    #[test]
    fn deterministic() {
        let issue = IssueBuilder::new("Hash me")
            .description("body")
            .priority(2)
            .build();

        let h1 = compute_content_hash(&issue);
        let h2 = compute_content_hash(&issue);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn differs_on_content_change() {
        let a = IssueBuilder::new("Title A").build();
        let b = IssueBuilder::new("Title B").build();
        assert_ne!(compute_content_hash(&a), compute_content_hash(&b));
    }

    #[test]
    fn ignores_id_and_timestamps() {
        let mut a = IssueBuilder::new("Same content").build();
        let mut b = IssueBuilder::new("Same content").build();

        a.id = "sp-aaa".into();
        b.id = "sp-bbb".into();
        a.created_at = chrono::Utc::now();
        b.created_at = chrono::DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);

        assert_eq!(compute_content_hash(&a), compute_content_hash(&b));
    }

    #[test]
    fn field_boundaries_do_not_collide() {
        let a = IssueBuilder::new("ab").description("c").build();
        let b = IssueBuilder::new("a").description("bc").build();
        assert_ne!(compute_content_hash(&a), compute_content_hash(&b));
    }
}
