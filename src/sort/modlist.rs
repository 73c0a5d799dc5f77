//! Mod priority sorting for modlist.txt.
//!
//! MO2 reads modlist.txt top-down with "top wins": a mod higher in the
//! file overrides file conflicts with mods below it. The collection's
//! before/after rules are hard constraints; when they are silent the
//! order should track the plugin load order and the collection author's
//! ordering. Four candidate orderings vote, and a final Kahn pass keeps
//! the constraints hard while using the vote as the tie-breaker.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Ensemble weights; normalised by their sum (6.0).
const WEIGHT_DFS: f64 = 2.0;
const WEIGHT_KAHN: f64 = 2.0;
const WEIGHT_PLUGIN: f64 = 1.5;
const WEIGHT_COLLECTION: f64 = 0.5;

/// A mod as the sorter sees it.
#[derive(Debug, Clone)]
pub struct SortMod {
    pub name: String,
    pub logical_filename: String,
    pub folder_name: String,
    pub md5: String,
}

impl SortMod {
    /// The identity rules reference: logical filename, else display name.
    fn rule_key(&self) -> &str {
        if self.logical_filename.is_empty() {
            &self.name
        } else {
            &self.logical_filename
        }
    }

    /// The name written to modlist.txt.
    fn output_folder(&self) -> &str {
        if self.folder_name.is_empty() {
            &self.name
        } else {
            &self.folder_name
        }
    }
}

/// A before/after constraint between two mods.
#[derive(Debug, Clone)]
pub struct SortRule {
    /// `before` or `after`; anything else is ignored.
    pub rule_type: String,
    pub source_logical_name: String,
    pub source_md5: String,
    pub reference_logical_name: String,
    pub reference_md5: String,
}

/// Constraint graph: `successors[i]` must sort after `i`.
struct RuleGraph {
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
}

/// Resolve rules to mod indices (logical filename first, md5 second;
/// unresolvable rules are skipped) and build the adjacency lists.
fn build_rule_graph(mods: &[SortMod], rules: &[SortRule]) -> RuleGraph {
    let n = mods.len();
    let mut key_to_idx: HashMap<&str, usize> = HashMap::new();
    let mut md5_to_key: HashMap<&str, &str> = HashMap::new();

    for (i, m) in mods.iter().enumerate() {
        key_to_idx.insert(m.rule_key(), i);
        if !m.md5.is_empty() {
            md5_to_key.insert(m.md5.as_str(), m.rule_key());
        }
    }

    let resolve = |logical: &str, md5: &str| -> Option<usize> {
        let key = if !logical.is_empty() {
            logical
        } else if !md5.is_empty() {
            md5_to_key.get(md5).copied()?
        } else {
            return None;
        };
        key_to_idx.get(key).copied()
    };

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut applied = 0usize;

    for rule in rules {
        let src = resolve(&rule.source_logical_name, &rule.source_md5);
        let reference = resolve(&rule.reference_logical_name, &rule.reference_md5);
        let (Some(src), Some(reference)) = (src, reference) else {
            continue;
        };

        match rule.rule_type.as_str() {
            "before" => {
                successors[src].push(reference);
                predecessors[reference].push(src);
                applied += 1;
            }
            "after" => {
                successors[reference].push(src);
                predecessors[src].push(reference);
                applied += 1;
            }
            _ => {}
        }
    }

    info!("Applied {} of {} mod rules", applied, rules.len());

    RuleGraph {
        successors,
        predecessors,
    }
}

/// Earliest position in the sorted plugin list of any `.esp/.esm/.esl`
/// inside a mod folder; `i64::MAX` when the mod ships no known plugin.
fn mod_plugin_position(
    folder: &str,
    mods_dir: &Path,
    plugin_positions: &HashMap<String, i64>,
) -> i64 {
    let mod_path = mods_dir.join(folder);
    if !mod_path.exists() {
        return i64::MAX;
    }

    let mut earliest = i64::MAX;
    for entry in WalkDir::new(&mod_path).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if ext == "esp" || ext == "esm" || ext == "esl" {
            let plugin = entry.file_name().to_string_lossy().to_lowercase();
            if let Some(&pos) = plugin_positions.get(&plugin) {
                earliest = earliest.min(pos);
            }
        }
    }
    earliest
}

/// Method 1: DFS post-order from sinks.
///
/// Sinks (no outgoing edges), visited in alphabetical folder order,
/// recurse into predecessors first; post-order output is reversed so
/// sinks land at the top. In-progress markers flag cycles without
/// aborting.
fn dfs_order(mods: &[SortMod], graph: &RuleGraph) -> Vec<usize> {
    let n = mods.len();
    let mut visited = vec![0u8; n]; // 0 unvisited, 1 in progress, 2 done
    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut has_cycle = false;

    let mut visit = |start: usize, visited: &mut Vec<u8>, order: &mut Vec<usize>| {
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some((node, mut pred_idx)) = stack.pop() {
            if pred_idx == 0 {
                if visited[node] == 2 {
                    continue;
                }
                if visited[node] == 1 {
                    has_cycle = true;
                    continue;
                }
                visited[node] = 1;
            }

            let mut descended = false;
            while pred_idx < graph.predecessors[node].len() {
                let pred = graph.predecessors[node][pred_idx];
                pred_idx += 1;
                if visited[pred] == 0 {
                    stack.push((node, pred_idx));
                    stack.push((pred, 0));
                    descended = true;
                    break;
                } else if visited[pred] == 1 {
                    has_cycle = true;
                }
            }

            if !descended {
                visited[node] = 2;
                order.push(node);
            }
        }
    };

    let mut sinks: Vec<usize> = (0..n)
        .filter(|&i| graph.successors[i].is_empty())
        .collect();
    sinks.sort_by(|&a, &b| mods[a].output_folder().cmp(mods[b].output_folder()));
    for sink in sinks {
        if visited[sink] == 0 {
            visit(sink, &mut visited, &mut order);
        }
    }

    let mut remaining: Vec<usize> = (0..n).filter(|&i| visited[i] == 0).collect();
    remaining.sort_by(|&a, &b| mods[a].output_folder().cmp(mods[b].output_folder()));
    for node in remaining {
        if visited[node] == 0 {
            visit(node, &mut visited, &mut order);
        }
    }

    if has_cycle {
        warn!("Cycle in mod rules; some mods may be misordered");
    }

    order.reverse();
    order
}

/// Kahn's algorithm with a priority queue; lower tie-breaker pops first.
/// Cycles leave unprocessed nodes, which are appended by tie-breaker.
fn kahn_order<T: Ord + Copy>(graph: &RuleGraph, tie_breaker: &[T]) -> Vec<usize> {
    let n = tie_breaker.len();

    #[derive(PartialEq, Eq)]
    struct Ready<T: Ord> {
        priority: T,
        index: usize,
    }
    impl<T: Ord> Ord for Ready<T> {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            // Min-heap via reversed comparison; index keeps it deterministic.
            other
                .priority
                .cmp(&self.priority)
                .then_with(|| other.index.cmp(&self.index))
        }
    }
    impl<T: Ord> PartialOrd for Ready<T> {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }

    let mut in_degree: Vec<usize> = graph.predecessors.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Ready<T>> = BinaryHeap::new();
    for i in 0..n {
        if in_degree[i] == 0 {
            ready.push(Ready {
                priority: tie_breaker[i],
                index: i,
            });
        }
    }

    let mut result = Vec::with_capacity(n);
    while let Some(Ready { index, .. }) = ready.pop() {
        result.push(index);
        for &succ in &graph.successors[index] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.push(Ready {
                    priority: tie_breaker[succ],
                    index: succ,
                });
            }
        }
    }

    if result.len() < n {
        let seen: HashSet<usize> = result.iter().copied().collect();
        let mut leftover: Vec<usize> = (0..n).filter(|i| !seen.contains(i)).collect();
        leftover.sort_by_key(|&i| tie_breaker[i]);
        result.extend(leftover);
    }

    result
}

/// Positions in an ordering -> rank per mod index.
fn ranks_of(order: &[usize], n: usize) -> Vec<usize> {
    let mut ranks = vec![0usize; n];
    for (pos, &idx) in order.iter().enumerate() {
        ranks[idx] = pos;
    }
    // Mods missing from the ordering keep rank 0; the DFS and Kahn
    // orderings always cover every node, so this does not occur.
    debug_assert_eq!(order.len(), n);
    ranks
}

/// Compute the final mod order (top of modlist.txt first).
///
/// `sorted_plugins` is the plugin load order produced by the plugin
/// sorter; `mods_dir` is scanned to find which plugins live in which mod
/// folder.
pub fn compute_mod_order(
    mods: &[SortMod],
    rules: &[SortRule],
    sorted_plugins: &[String],
    mods_dir: &Path,
) -> Vec<String> {
    let n = mods.len();
    if n == 0 {
        return Vec::new();
    }

    let graph = build_rule_graph(mods, rules);

    let plugin_positions: HashMap<String, i64> = sorted_plugins
        .iter()
        .enumerate()
        .map(|(i, p)| (p.to_lowercase(), i as i64))
        .collect();

    let mod_positions: Vec<i64> = mods
        .iter()
        .map(|m| mod_plugin_position(m.output_folder(), mods_dir, &plugin_positions))
        .collect();

    // Method 1: DFS from sinks.
    let dfs_rank = ranks_of(&dfs_order(mods, &graph), n);

    // Method 2: Kahn keyed by earliest plugin position.
    let kahn_rank = ranks_of(&kahn_order(&graph, &mod_positions), n);

    // Method 3: pure plugin order, stable over the collection order.
    let mut by_plugin: Vec<usize> = (0..n).collect();
    by_plugin.sort_by_key(|&i| (mod_positions[i], i));
    let plugin_rank = ranks_of(&by_plugin, n);

    // Method 4: the collection's own order.
    let collection_rank: Vec<usize> = (0..n).collect();

    let total_weight = WEIGHT_DFS + WEIGHT_KAHN + WEIGHT_PLUGIN + WEIGHT_COLLECTION;
    let combined: Vec<f64> = (0..n)
        .map(|i| {
            (WEIGHT_DFS * dfs_rank[i] as f64
                + WEIGHT_KAHN * kahn_rank[i] as f64
                + WEIGHT_PLUGIN * plugin_rank[i] as f64
                + WEIGHT_COLLECTION * collection_rank[i] as f64)
                / total_weight
        })
        .collect();

    // Integer rank of the combined score, stable by index.
    let mut by_score: Vec<usize> = (0..n).collect();
    by_score.sort_by(|&a, &b| {
        combined[a]
            .partial_cmp(&combined[b])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });
    let mut combined_rank = vec![0i64; n];
    for (pos, &idx) in by_score.iter().enumerate() {
        combined_rank[idx] = pos as i64;
    }

    // Final pass: constraints stay hard, the ensemble vote breaks ties.
    let final_order = kahn_order(&graph, &combined_rank);

    let position: HashMap<usize, usize> = final_order
        .iter()
        .enumerate()
        .map(|(pos, &idx)| (idx, pos))
        .collect();
    let mut violations = 0usize;
    for i in 0..n {
        for &pred in &graph.predecessors[i] {
            if position[&pred] > position[&i] {
                violations += 1;
            }
        }
    }
    if violations > 0 {
        warn!("{} constraint violations (cycles in mod rules)", violations);
    }

    info!("Ensemble sort complete (DFS + Kahn + plugin + collection)");

    // Kahn emits sources first (lowest priority); MO2 wants winners on top.
    let mut result: Vec<String> = final_order
        .into_iter()
        .map(|i| mods[i].output_folder().to_string())
        .collect();
    result.reverse();
    result
}

/// Write modlist.txt: banner comments then one `+folder` per line.
pub fn write_modlist(path: &Path, mod_order: &[String]) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writeln!(file, "# This file was automatically generated by NexusBridge")?;
    writeln!(file, "# Mod priority: Top = Winner, Bottom = Loser")?;
    for folder in mod_order {
        writeln!(file, "+{}", folder)?;
    }

    info!("Generated modlist.txt with {} mods", mod_order.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sort_mod(name: &str) -> SortMod {
        SortMod {
            name: name.to_string(),
            logical_filename: format!("{}.7z", name.to_lowercase()),
            folder_name: name.to_string(),
            md5: format!("md5-{}", name),
        }
    }

    fn rule(kind: &str, source: &str, reference: &str) -> SortRule {
        SortRule {
            rule_type: kind.to_string(),
            source_logical_name: format!("{}.7z", source.to_lowercase()),
            source_md5: String::new(),
            reference_logical_name: format!("{}.7z", reference.to_lowercase()),
            reference_md5: String::new(),
        }
    }

    fn pos_of(order: &[String], name: &str) -> usize {
        order.iter().position(|m| m == name).unwrap()
    }

    #[test]
    fn test_before_rule_puts_source_below() {
        let mods = vec![sort_mod("Alpha"), sort_mod("Beta")];
        let rules = vec![rule("before", "Alpha", "Beta")];

        let order = compute_mod_order(&mods, &rules, &[], Path::new("/nonexistent"));

        // "Alpha before Beta": Alpha loses conflicts, so Beta is on top.
        assert!(pos_of(&order, "Beta") < pos_of(&order, "Alpha"));
    }

    #[test]
    fn test_after_rule_puts_source_above() {
        let mods = vec![sort_mod("Alpha"), sort_mod("Beta")];
        let rules = vec![rule("after", "Alpha", "Beta")];

        let order = compute_mod_order(&mods, &rules, &[], Path::new("/nonexistent"));
        assert!(pos_of(&order, "Alpha") < pos_of(&order, "Beta"));
    }

    #[test]
    fn test_rule_topology_with_collection_tiebreak() {
        // Mods A,B,C,D; rules: A before C, D after B. No plugins anywhere,
        // so the ensemble reduces to collection order for unconstrained
        // pairs.
        let mods = vec![sort_mod("A"), sort_mod("B"), sort_mod("C"), sort_mod("D")];
        let rules = vec![rule("before", "A", "C"), rule("after", "D", "B")];

        let order = compute_mod_order(&mods, &rules, &[], Path::new("/nonexistent"));

        assert!(pos_of(&order, "C") < pos_of(&order, "A"), "A must be below C");
        assert!(pos_of(&order, "D") < pos_of(&order, "B"), "D must be above B");
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_md5_rule_resolution() {
        let mods = vec![sort_mod("Alpha"), sort_mod("Beta")];
        let rules = vec![SortRule {
            rule_type: "before".to_string(),
            source_logical_name: String::new(),
            source_md5: "md5-Alpha".to_string(),
            reference_logical_name: String::new(),
            reference_md5: "md5-Beta".to_string(),
        }];

        let order = compute_mod_order(&mods, &rules, &[], Path::new("/nonexistent"));
        assert!(pos_of(&order, "Beta") < pos_of(&order, "Alpha"));
    }

    #[test]
    fn test_unresolvable_rule_skipped() {
        let mods = vec![sort_mod("Alpha"), sort_mod("Beta")];
        let rules = vec![rule("before", "Alpha", "Missing")];

        let order = compute_mod_order(&mods, &rules, &[], Path::new("/nonexistent"));
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn test_cycle_does_not_abort() {
        let mods = vec![sort_mod("Alpha"), sort_mod("Beta")];
        let rules = vec![rule("before", "Alpha", "Beta"), rule("before", "Beta", "Alpha")];

        let order = compute_mod_order(&mods, &rules, &[], Path::new("/nonexistent"));
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn test_plugin_order_influences_unconstrained_mods() {
        let temp = tempdir().unwrap();
        let mods_dir = temp.path();

        // LatePlugin sorts after EarlyPlugin; put the early plugin in the
        // second collection entry so plugin order must override
        // collection order.
        std::fs::create_dir_all(mods_dir.join("First")).unwrap();
        std::fs::write(mods_dir.join("First/late.esp"), "").unwrap();
        std::fs::create_dir_all(mods_dir.join("Second")).unwrap();
        std::fs::write(mods_dir.join("Second/early.esp"), "").unwrap();

        let mods = vec![sort_mod("First"), sort_mod("Second")];
        let sorted_plugins = vec!["early.esp".to_string(), "late.esp".to_string()];

        let order = compute_mod_order(&mods, &[], &sorted_plugins, mods_dir);

        // "Second" holds the earlier plugin, giving it the lower combined
        // rank, so it ends up at the bottom (installed "first").
        assert_eq!(order, vec!["First".to_string(), "Second".to_string()]);
    }

    #[test]
    fn test_write_modlist_format() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("modlist.txt");

        write_modlist(&path, &["TopMod".to_string(), "BottomMod".to_string()]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert!(lines[0].starts_with('#'));
        assert!(lines[1].starts_with('#'));
        assert_eq!(lines[2], "+TopMod");
        assert_eq!(lines[3], "+BottomMod");
    }
}
