//! Merges per-lane unified diff patches into a single combined patch,
//! detecting overlapping-hunk conflicts.

use std::collections::BTreeMap;

/// One `@@ -old_start,old_count +new_start,new_count @@` hunk and its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub body: String,
}

impl Hunk {
    fn old_range_end(&self) -> u32 {
        self.old_start + self.old_count
    }

    fn overlaps(&self, other: &Hunk) -> bool {
        self.old_start < other.old_range_end() && other.old_start < self.old_range_end()
    }
}

/// A parsed unified diff for a single file.
#[derive(Debug, Clone)]
pub struct FileDiff {
    pub file_path: String,
    pub hunks: Vec<Hunk>,
}

/// A labelled patch contributed by one lane of execution.
#[derive(Debug, Clone)]
pub struct LaneDiff {
    pub lane_label: String,
    pub patch: String,
}

/// A conflict detected between two or more lanes touching the same file.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub file_path: String,
    pub reason: String,
    pub lane_labels: Vec<String>,
}

/// The result of merging a set of lane diffs.
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    pub merged_patch: String,
    pub merged_files: usize,
    pub conflicts: Vec<Conflict>,
    pub conflict_count: usize,
    pub additions: usize,
    pub deletions: usize,
    pub lane_diffs: Vec<LaneDiff>,
}

/// Parse a unified diff patch into per-file hunk lists.
pub fn parse_unified_diff(patch: &str) -> Vec<FileDiff> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current_file: Option<String> = None;
    let mut current_hunk: Option<Hunk> = None;
    let mut body_lines: Vec<&str> = Vec::new();

    fn flush_hunk(files: &mut Vec<FileDiff>, current_file: &str, hunk: Option<Hunk>, body: &[&str]) {
        if let Some(mut h) = hunk {
            h.body = body.join("\n");
            if let Some(file) = files.iter_mut().find(|f| f.file_path == current_file) {
                file.hunks.push(h);
            } else {
                files.push(FileDiff {
                    file_path: current_file.to_string(),
                    hunks: vec![h],
                });
            }
        }
    }

    for line in patch.lines() {
        if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(file) = current_file.as_deref() {
                flush_hunk(&mut files, file, current_hunk.take(), &body_lines);
                body_lines.clear();
            }
            let path = rest.trim_start_matches("b/").to_string();
            current_file = Some(path);
        } else if let Some(rest) = line.strip_prefix("@@ ") {
            if let Some(file) = current_file.as_deref() {
                flush_hunk(&mut files, file, current_hunk.take(), &body_lines);
                body_lines.clear();
            }
            current_hunk = parse_hunk_header(rest);
        } else if current_hunk.is_some() {
            body_lines.push(line);
        }
    }

    if let Some(file) = current_file.as_deref() {
        flush_hunk(&mut files, file, current_hunk.take(), &body_lines);
    }

    files
}

/// Parse `-old_start[,old_count] +new_start[,new_count] @@...` (the text
/// following `@@ `).
fn parse_hunk_header(rest: &str) -> Option<Hunk> {
    let header = rest.split(" @@").next()?;
    let mut parts = header.split_whitespace();
    let old_part = parts.next()?.strip_prefix('-')?;
    let new_part = parts.next()?.strip_prefix('+')?;

    let (old_start, old_count) = parse_range(old_part)?;
    let (new_start, new_count) = parse_range(new_part)?;

    Some(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        body: String::new(),
    })
}

fn parse_range(s: &str) -> Option<(u32, u32)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

/// Merge multiple lane diffs. Two hunks on the same file conflict iff their
/// original-file line ranges overlap. If any conflict exists, `merged_patch`
/// is empty and `merged_files` is zero.
pub fn merge_diffs(lanes: &[LaneDiff]) -> MergeResult {
    let mut per_file: BTreeMap<String, Vec<(String, Hunk)>> = BTreeMap::new();

    for lane in lanes {
        for file_diff in parse_unified_diff(&lane.patch) {
            let entry = per_file.entry(file_diff.file_path.clone()).or_default();
            for hunk in file_diff.hunks {
                entry.push((lane.lane_label.clone(), hunk));
            }
        }
    }

    let mut conflicts = Vec::new();
    let mut additions = 0usize;
    let mut deletions = 0usize;

    for (file_path, hunks) in &per_file {
        for i in 0..hunks.len() {
            for j in (i + 1)..hunks.len() {
                if hunks[i].1.overlaps(&hunks[j].1) {
                    let mut labels = vec![hunks[i].0.clone(), hunks[j].0.clone()];
                    labels.sort();
                    labels.dedup();
                    conflicts.push(Conflict {
                        file_path: file_path.clone(),
                        reason: "overlapping hunks".to_string(),
                        lane_labels: labels,
                    });
                }
            }
        }
    }

    for (_, hunks) in &per_file {
        for (_, hunk) in hunks {
            for line in hunk.body.lines() {
                if line.starts_with('+') && !line.starts_with("+++") {
                    additions += 1;
                } else if line.starts_with('-') && !line.starts_with("---") {
                    deletions += 1;
                }
            }
        }
    }

    let conflict_count = conflicts.len();

    if conflict_count > 0 {
        return MergeResult {
            merged_patch: String::new(),
            merged_files: 0,
            conflicts,
            conflict_count,
            additions,
            deletions,
            lane_diffs: lanes.to_vec(),
        };
    }

    let mut merged_patch = String::new();
    for (file_path, hunks) in &per_file {
        let mut sorted_hunks = hunks.clone();
        sorted_hunks.sort_by_key(|(_, h)| h.old_start);

        merged_patch.push_str(&format!("--- a/{file_path}\n+++ b/{file_path}\n"));
        for (_, hunk) in &sorted_hunks {
            merged_patch.push_str(&format!(
                "@@ -{},{} +{},{} @@\n{}\n",
                hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count, hunk.body
            ));
        }
    }

    MergeResult {
        merged_patch,
        merged_files: per_file.len(),
        conflicts: Vec::new(),
        conflict_count: 0,
        additions,
        deletions,
        lane_diffs: lanes.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane(label: &str, patch: &str) -> LaneDiff {
        LaneDiff {
            lane_label: label.to_string(),
            patch: patch.to_string(),
        }
    }

    #[test]
    fn single_lane_passes_through_unmerged() {
        let patch = "+++ b/foo.txt\n@@ -1,1 +1,1 @@\n-old\n+new\n";
        let result = merge_diffs(&[lane("a", patch)]);
        assert_eq!(result.merged_files, 1);
        assert_eq!(result.conflict_count, 0);
        assert!(result.merged_patch.contains("foo.txt"));
        assert!(result.merged_patch.contains("@@ -1,1 +1,1 @@"));
    }

    #[test]
    fn overlapping_hunks_on_same_file_conflict() {
        let a = "+++ b/foo.txt\n@@ -1,1 +1,1 @@\n-old\n+new-a\n";
        let b = "+++ b/foo.txt\n@@ -1,1 +1,1 @@\n-old\n+new-b\n";
        let result = merge_diffs(&[lane("a", a), lane("b", b)]);

        assert_eq!(result.merged_files, 0);
        assert_eq!(result.conflict_count, 1);
        assert_eq!(result.conflicts[0].file_path, "foo.txt");
        assert_eq!(result.merged_patch, "");
    }

    #[test]
    fn non_overlapping_hunks_on_same_file_merge() {
        let a = "+++ b/foo.txt\n@@ -1,1 +1,1 @@\n-old1\n+new1\n";
        let b = "+++ b/foo.txt\n@@ -10,1 +10,1 @@\n-old10\n+new10\n";
        let result = merge_diffs(&[lane("a", a), lane("b", b)]);

        assert_eq!(result.merged_files, 1);
        assert_eq!(result.conflict_count, 0);
        assert!(result.merged_patch.contains("@@ -1,1 +1,1 @@"));
        assert!(result.merged_patch.contains("@@ -10,1 +10,1 @@"));
    }

    #[test]
    fn files_touched_by_one_lane_never_conflict() {
        let a = "+++ b/foo.txt\n@@ -1,1 +1,1 @@\n-old\n+new\n";
        let b = "+++ b/bar.txt\n@@ -1,1 +1,1 @@\n-old\n+new\n";
        let result = merge_diffs(&[lane("a", a), lane("b", b)]);

        assert_eq!(result.merged_files, 2);
        assert_eq!(result.conflict_count, 0);
    }

    #[test]
    fn tallies_additions_and_deletions() {
        let a = "+++ b/foo.txt\n@@ -1,2 +1,2 @@\n-old1\n-old2\n+new1\n+new2\n";
        let result = merge_diffs(&[lane("a", a)]);
        assert_eq!(result.additions, 2);
        assert_eq!(result.deletions, 2);
    }
}
