//! Subvolume records and parsers for `btrfs subvolume list` / `show` output.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::{CloneError, Result};

/// Identifier of the unnameable top-of-filesystem pseudo-subvolume.
pub const TOPLEVEL_ID: u64 = 5;

/// Immutable metadata snapshot for one source subvolume.
///
/// `parent_id` is the enclosing subvolume in the directory tree;
/// `parent_uuid` is the snapshot-lineage origin. The two hierarchies are
/// orthogonal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subvolume {
    /// Tree-position path relative to the source mount, no leading slash.
    pub path: String,
    pub id: u64,
    pub parent_id: u64,
    pub uuid: String,
    /// Snapshot origin; `None` for non-snapshots or when the origin has been
    /// deleted.
    pub parent_uuid: Option<String>,
    /// Current transaction generation.
    pub gen: u64,
    /// Generation at creation.
    pub ogen: u64,
    /// Read-only at enumeration time.
    pub ro: bool,
}

impl Subvolume {
    /// Effectively untouched since creation, typically a read-only snapshot.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.gen.saturating_sub(self.ogen) <= 1
    }

    /// Absolute path of this subvolume under the given mount.
    #[must_use]
    pub fn path_under(&self, mnt: &Path) -> PathBuf {
        mnt.join(&self.path)
    }

    /// Final component of the tree path.
    #[must_use]
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Log-file-friendly name: path with `/` replaced by `-`.
    #[must_use]
    pub fn log_name(&self) -> String {
        self.path.replace('/', "-")
    }
}

impl std::fmt::Display for Subvolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subvol {} at \"{}\"", self.id, self.path)
    }
}

/// One data row of `btrfs subvolume list -t` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    pub id: u64,
    pub gen: u64,
    pub top_level: u64,
    pub path: String,
}

/// Parse the four-column `list -t` table, skipping the header, the dash
/// ruler, and anything else that does not look like a row.
#[must_use]
pub fn parse_list_table(raw: &str) -> Vec<ListRow> {
    let mut rows = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            continue;
        }
        let (Ok(id), Ok(gen), Ok(top_level)) = (
            fields[0].parse::<u64>(),
            fields[1].parse::<u64>(),
            fields[2].parse::<u64>(),
        ) else {
            continue;
        };
        rows.push(ListRow {
            id,
            gen,
            top_level,
            path: fields[3].to_string(),
        });
    }
    rows
}

/// Fields extracted from `btrfs subvolume show` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShowFields {
    pub uuid: Option<String>,
    /// `Some(None)` when the field was present but `-`.
    pub parent_uuid: Option<Option<String>>,
    pub id: Option<u64>,
    pub parent_id: Option<u64>,
    pub ogen: Option<u64>,
    pub ro: Option<bool>,
}

/// Parse the key/value body of `btrfs subvolume show`.
#[must_use]
pub fn parse_show_output(raw: &str) -> ShowFields {
    let mut fields = ShowFields::default();
    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "UUID" => fields.uuid = Some(value.to_string()),
            "Parent UUID" => {
                fields.parent_uuid = Some(if value == "-" {
                    None
                } else {
                    Some(value.to_string())
                });
            }
            "Subvolume ID" => fields.id = value.parse().ok(),
            "Parent ID" => fields.parent_id = value.parse().ok(),
            "Gen at creation" => fields.ogen = value.parse().ok(),
            "Flags" => fields.ro = Some(value.contains("readonly")),
            _ => {}
        }
    }
    fields
}

/// Combine a list row with its show fields into a full record.
///
/// A missing required field is fatal for the whole enumeration; an `id`
/// mismatch between the two commands means the filesystem changed under us.
pub fn subvolume_from_parts(row: &ListRow, show: &ShowFields) -> Result<Subvolume> {
    let name = format!("subvol {} at \"{}\"", row.id, row.path);
    let missing = |field: &'static str| CloneError::MissingField {
        subvol: name.clone(),
        field,
    };

    let uuid = show.uuid.clone().ok_or_else(|| missing("uuid"))?;
    let parent_uuid = show.parent_uuid.clone().ok_or_else(|| missing("parent_uuid"))?;
    let parent_id = show.parent_id.ok_or_else(|| missing("parent_id"))?;
    let ogen = show.ogen.ok_or_else(|| missing("ogen"))?;
    let ro = show.ro.ok_or_else(|| missing("ro"))?;

    if let Some(shown_id) = show.id {
        if shown_id != row.id {
            return Err(CloneError::Enumeration {
                details: format!("{name}: show reports id {shown_id}, list reports {}", row.id),
            });
        }
    }

    Ok(Subvolume {
        path: row.path.clone(),
        id: row.id,
        parent_id,
        uuid,
        parent_uuid,
        gen: row.gen,
        ogen,
        ro,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_SAMPLE: &str = "\
ID\tgen\ttop level\tpath\t\n\
--\t---\t---------\t----\t\n\
256\t2083\t5\thome\n\
257\t2090\t5\tsnapshots/home-2024\n";

    const SHOW_SAMPLE: &str = "\
home\n\
\tName: \t\t\thome\n\
\tUUID: \t\t\t11111111-aaaa-bbbb-cccc-000000000001\n\
\tParent UUID: \t\t-\n\
\tReceived UUID: \t\t-\n\
\tCreation time: \t\t2024-01-01 12:00:00 +0000\n\
\tSubvolume ID: \t\t256\n\
\tGeneration: \t\t2083\n\
\tGen at creation: \t10\n\
\tParent ID: \t\t5\n\
\tTop level ID: \t\t5\n\
\tFlags: \t\t\t-\n";

    #[test]
    fn list_table_skips_header_and_ruler() {
        let rows = parse_list_table(LIST_SAMPLE);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 256);
        assert_eq!(rows[0].gen, 2083);
        assert_eq!(rows[0].top_level, 5);
        assert_eq!(rows[0].path, "home");
        assert_eq!(rows[1].path, "snapshots/home-2024");
    }

    #[test]
    fn list_table_on_garbage_is_empty() {
        assert!(parse_list_table("not a table\nat all\n").is_empty());
    }

    #[test]
    fn show_output_parses_all_fields() {
        let fields = parse_show_output(SHOW_SAMPLE);
        assert_eq!(
            fields.uuid.as_deref(),
            Some("11111111-aaaa-bbbb-cccc-000000000001")
        );
        assert_eq!(fields.parent_uuid, Some(None));
        assert_eq!(fields.id, Some(256));
        assert_eq!(fields.parent_id, Some(5));
        assert_eq!(fields.ogen, Some(10));
        assert_eq!(fields.ro, Some(false));
    }

    #[test]
    fn show_output_readonly_flag() {
        let fields = parse_show_output("\tFlags: \t\t\treadonly\n");
        assert_eq!(fields.ro, Some(true));
    }

    #[test]
    fn show_output_present_parent_uuid() {
        let fields =
            parse_show_output("\tParent UUID: \t\t22222222-aaaa-bbbb-cccc-000000000002\n");
        assert_eq!(
            fields.parent_uuid,
            Some(Some("22222222-aaaa-bbbb-cccc-000000000002".to_string()))
        );
    }

    #[test]
    fn combining_parts_builds_subvolume() {
        let rows = parse_list_table(LIST_SAMPLE);
        let show = parse_show_output(SHOW_SAMPLE);
        let sv = subvolume_from_parts(&rows[0], &show).expect("subvolume should build");
        assert_eq!(sv.id, 256);
        assert_eq!(sv.gen, 2083);
        assert_eq!(sv.ogen, 10);
        assert!(!sv.ro);
        assert!(sv.parent_uuid.is_none());
        assert!(!sv.is_static());
    }

    #[test]
    fn missing_uuid_is_fatal() {
        let rows = parse_list_table(LIST_SAMPLE);
        let show = ShowFields {
            parent_uuid: Some(None),
            parent_id: Some(5),
            ogen: Some(10),
            ro: Some(false),
            ..ShowFields::default()
        };
        let err = subvolume_from_parts(&rows[0], &show).unwrap_err();
        assert_eq!(err.code(), "BFC-1102");
        assert!(err.to_string().contains("uuid"));
    }

    #[test]
    fn id_mismatch_is_fatal() {
        let rows = parse_list_table(LIST_SAMPLE);
        let mut show = parse_show_output(SHOW_SAMPLE);
        show.id = Some(999);
        let err = subvolume_from_parts(&rows[0], &show).unwrap_err();
        assert_eq!(err.code(), "BFC-1101");
    }

    #[test]
    fn static_means_at_most_one_generation_of_drift() {
        let mut sv = Subvolume {
            path: "snap".to_string(),
            id: 300,
            parent_id: 5,
            uuid: "u".to_string(),
            parent_uuid: None,
            gen: 11,
            ogen: 10,
            ro: true,
        };
        assert!(sv.is_static());
        sv.gen = 12;
        assert!(!sv.is_static());
    }

    #[test]
    fn basename_and_log_name() {
        let sv = Subvolume {
            path: "snapshots/home-2024".to_string(),
            id: 257,
            parent_id: 5,
            uuid: "u".to_string(),
            parent_uuid: None,
            gen: 1,
            ogen: 1,
            ro: false,
        };
        assert_eq!(sv.basename(), "home-2024");
        assert_eq!(sv.log_name(), "snapshots-home-2024");
    }
}
