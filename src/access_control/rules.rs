//! Rendering and parsing of managed HBA rule lines.
//!
//! Line format is `<mode> <database> <role> <address> <auth-method>`. Output is
//! column-aligned with spaces; the parser accepts any run of whitespace as a
//! separator and skips comments and blank lines.

use std::fmt::Write as _;

use serde::Serialize;
use utoipa::ToSchema;

use crate::repositories::TenantRules;

pub const ALLOW_MODE: &str = "hostssl";
pub const DENY_MODE: &str = "host";
pub const ALLOW_METHOD: &str = "scram-sha-256";
pub const DENY_METHOD: &str = "reject";
pub const DENY_ALL_V4: &str = "0.0.0.0/0";
pub const DENY_ALL_V6: &str = "::/0";

/// One line of the access-control file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct HbaRule {
    pub mode: String,
    pub database: String,
    pub role: String,
    pub address: String,
    pub method: String,
}

impl HbaRule {
    fn new(mode: &str, database: &str, role: &str, address: &str, method: &str) -> Self {
        Self {
            mode: mode.to_string(),
            database: database.to_string(),
            role: role.to_string(),
            address: address.to_string(),
            method: method.to_string(),
        }
    }

    pub fn allow(database: &str, role: &str, address: &str) -> Self {
        Self::new(ALLOW_MODE, database, role, address, ALLOW_METHOD)
    }

    /// Deny-all pair closing a tenant's rule block
    pub fn deny_all(database: &str, role: &str) -> [Self; 2] {
        [
            Self::new(DENY_MODE, database, role, DENY_ALL_V4, DENY_METHOD),
            Self::new(DENY_MODE, database, role, DENY_ALL_V6, DENY_METHOD),
        ]
    }

    pub fn is_allow(&self) -> bool {
        self.method != DENY_METHOD
    }

    fn columns(&self) -> [&str; 5] {
        [
            &self.mode,
            &self.database,
            &self.role,
            &self.address,
            &self.method,
        ]
    }
}

/// A tenant's rules in file order, with the tenant id for the block comment
struct RuleBlock {
    tenant_id: uuid::Uuid,
    rules: Vec<HbaRule>,
}

/// Rules for every tenant with at least one entry, in snapshot order
pub fn build_rules(snapshot: &[TenantRules]) -> Vec<HbaRule> {
    blocks(snapshot).into_iter().flat_map(|b| b.rules).collect()
}

fn blocks(snapshot: &[TenantRules]) -> Vec<RuleBlock> {
    snapshot
        .iter()
        .filter(|(_, entries)| !entries.is_empty())
        .map(|(tenant, entries)| {
            let mut rules: Vec<HbaRule> = entries
                .iter()
                .map(|entry| HbaRule::allow(&tenant.database_name, &tenant.role_name, &entry.address))
                .collect();
            rules.extend(HbaRule::deny_all(&tenant.database_name, &tenant.role_name));
            RuleBlock {
                tenant_id: tenant.id,
                rules,
            }
        })
        .collect()
}

/// Text placed between the markers. Empty when no tenant has entries.
pub fn render_managed_region(snapshot: &[TenantRules]) -> String {
    let blocks = blocks(snapshot);

    let mut widths = [0usize; 4];
    for rule in blocks.iter().flat_map(|b| &b.rules) {
        for (width, column) in widths.iter_mut().zip(rule.columns()) {
            *width = (*width).max(column.len());
        }
    }

    let mut out = String::new();
    for block in &blocks {
        let _ = writeln!(out, "# tenant {}", block.tenant_id);
        for rule in &block.rules {
            let [mode, database, role, address, method] = rule.columns();
            let _ = writeln!(
                out,
                "{mode:<w0$} {database:<w1$} {role:<w2$} {address:<w3$} {method}",
                w0 = widths[0],
                w1 = widths[1],
                w2 = widths[2],
                w3 = widths[3],
            );
        }
    }
    out
}

/// Parse rule lines, ignoring comments and blank lines. Lines without exactly
/// five fields are reported by 1-based line number.
pub fn parse_rules(text: &str) -> Result<Vec<HbaRule>, String> {
    let mut rules = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [mode, database, role, address, method] => {
                rules.push(HbaRule::new(mode, database, role, address, method))
            }
            _ => {
                return Err(format!(
                    "line {} has {} fields, expected 5",
                    index + 1,
                    fields.len()
                ));
            }
        }
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tenant::{Model as TenantModel, TenantStatus};
    use crate::models::whitelist_entry::Model as EntryModel;
    use chrono::Utc;
    use uuid::Uuid;

    fn tenant(token: &str) -> TenantModel {
        TenantModel {
            id: Uuid::new_v4(),
            database_name: format!("tenant_{token}"),
            role_name: format!("user_{token}"),
            password_hash: String::new(),
            owner_email: "a@b.com".into(),
            friendly_name: "T".into(),
            max_connections: 20,
            status: TenantStatus::Active,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    fn entry(tenant: &TenantModel, address: &str) -> EntryModel {
        EntryModel {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            address: address.into(),
            description: None,
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn tenant_block_ends_with_deny_pair() {
        let t = tenant("aaaa");
        let snapshot = vec![(
            t.clone(),
            vec![entry(&t, "10.0.0.1/32"), entry(&t, "192.168.0.0/16")],
        )];

        let rules = parse_rules(&render_managed_region(&snapshot)).unwrap();

        assert_eq!(rules, {
            let mut expected = vec![
                HbaRule::allow("tenant_aaaa", "user_aaaa", "10.0.0.1/32"),
                HbaRule::allow("tenant_aaaa", "user_aaaa", "192.168.0.0/16"),
            ];
            expected.extend(HbaRule::deny_all("tenant_aaaa", "user_aaaa"));
            expected
        });
    }

    #[test]
    fn tenants_without_entries_emit_nothing() {
        let t = tenant("bbbb");
        assert_eq!(render_managed_region(&[(t, vec![])]), "");
        assert!(build_rules(&[]).is_empty());
    }

    #[test]
    fn columns_are_aligned() {
        let a = tenant("aaaa");
        let b = tenant("bbbbbbbb");
        let snapshot = vec![
            (a.clone(), vec![entry(&a, "10.0.0.1/32")]),
            (b.clone(), vec![entry(&b, "10.1.0.0/16")]),
        ];

        let text = render_managed_region(&snapshot);
        let method_columns: Vec<usize> = text
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(|l| l.rfind(' ').unwrap())
            .collect();
        assert!(method_columns.windows(2).all(|w| w[0] == w[1]), "{text}");
    }

    #[test]
    fn parser_accepts_any_whitespace_run() {
        let rules = parse_rules("# comment\n\nhostssl\ttenant_x   user_x 10.0.0.1/32  scram-sha-256\n")
            .unwrap();
        assert_eq!(rules, vec![HbaRule::allow("tenant_x", "user_x", "10.0.0.1/32")]);
    }

    #[test]
    fn parser_reports_short_lines() {
        let err = parse_rules("host all all\n").unwrap_err();
        assert!(err.contains("line 1"), "{err}");
    }
}
