//! Reading and writing BEAST/NEXUS tree files.
//!
//! The trace format is NEXUS with a `Translate` block mapping tip ids to
//! taxon labels and one `tree STATE_n = ...` line per posterior sample.
//! Node annotations ride along in the Newick string as `[&name=value,...]`
//! payloads; they are the data this tool summarizes, so the reader parses
//! them into each node's attribute map instead of stripping them.
//!
//! Paths ending in `.gz` are read and written gzip-compressed; a path of
//! `-` is not supported (annotated trees go to files).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, SummaryError};
use crate::tree::{SummaryTree, Value};

/// One posterior sample, parsed on demand from its trace block.
pub struct TraceTree {
    /// 0-based position in the trace file.
    pub index: usize,
    /// MCMC state number from the `STATE_n` tree name (0 when unnamed).
    pub state: usize,
    pub name: String,
    pub tree: SummaryTree,
}

/// A tree-trace file held in memory, re-iterable once per pass.
///
/// The whole file is read once; each pass re-parses the tree blocks
/// lazily, so repeated passes see an identical stream (the registry's
/// consistency checks depend on that).
pub struct TreeTrace {
    translate: HashMap<String, String>,
    blocks: Vec<(String, String)>,
}

impl TreeTrace {
    /// Opens a `.trees` (NEXUS) file, gzip-decoded when the path ends in
    /// `.gz`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = read_to_string(path.as_ref())?;
        Ok(TreeTrace {
            translate: parse_taxon_block(&content),
            blocks: collect_tree_blocks(&content),
        })
    }

    /// Number of tree blocks in the file (before burn-in).
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Taxon id → label map from the `Translate` block; empty if absent.
    pub fn translate(&self) -> &HashMap<String, String> {
        &self.translate
    }

    /// One sequential parse of the whole trace. Call again for the next
    /// pass.
    pub fn trees(&self) -> impl Iterator<Item = Result<TraceTree>> + '_ {
        self.blocks.iter().enumerate().map(|(index, (header, body))| {
            let tree = parse_newick(body, Some(&self.translate)).map_err(|reason| {
                SummaryError::Parse { index, reason }
            })?;
            let name = header
                .splitn(2, char::is_whitespace)
                .nth(1)
                .unwrap_or(header)
                .trim()
                .to_string();
            Ok(TraceTree {
                index,
                state: extract_state(header),
                name,
                tree,
            })
        })
    }

    #[cfg(test)]
    pub(crate) fn from_string(content: &str) -> Self {
        TreeTrace {
            translate: parse_taxon_block(content),
            blocks: collect_tree_blocks(content),
        }
    }
}

fn read_to_string(path: &Path) -> Result<String> {
    let mut content = String::new();
    if path.to_string_lossy().ends_with(".gz") {
        GzDecoder::new(File::open(path)?).read_to_string(&mut content)?;
    } else {
        File::open(path)?.read_to_string(&mut content)?;
    }
    Ok(content)
}

/// Pulls the MCMC state number out of a tree header like
/// `tree STATE_250000`. Returns 0 when there is none.
fn extract_state(header: &str) -> usize {
    if let Some(start) = header.to_ascii_uppercase().find("STATE_") {
        let num_start = start + 6; // length of "STATE_"
        let rest = &header[num_start..];
        let state = rest
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>();
        if let Ok(num) = state.parse::<usize>() {
            return num;
        }
    }
    0
}

fn collect_tree_blocks(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TREE "))
        .take_while(|line| !line.trim().to_ascii_uppercase().starts_with("END;"))
        .filter_map(|line| {
            let mut parts = line.splitn(2, '=');
            let header = parts.next()?.trim();
            if !header.to_ascii_uppercase().starts_with("TREE ") {
                return None;
            }
            let body = parts.next()?.trim().to_string();
            Some((header.to_string(), body))
        })
        .collect()
}

fn parse_taxon_block(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TRANSLATE"))
        .skip(1)
        .take_while(|line| !line.trim().starts_with(';'))
        // STRUCTURE:
        // 1 '1959.M.CD.59.ZR59',
        // 2 '1960.DRC60A',
        .filter_map(|line| {
            let line = line.trim().trim_end_matches(',');
            let mut parts = line.split_whitespace();
            let id = parts.next()?.to_string();
            let label = parts.next()?.trim_matches('\'').to_string();
            Some((id, label))
        })
        .collect::<HashMap<_, _>>()
}

/// Reads a user-supplied target tree: NEXUS if the file declares itself as
/// such, otherwise the first line is taken as bare Newick.
pub fn read_target_tree<P: AsRef<Path>>(path: P) -> Result<SummaryTree> {
    let content = read_to_string(path.as_ref())?;
    if content.trim_start().to_ascii_uppercase().starts_with("#NEXUS") {
        let translate = parse_taxon_block(&content);
        let blocks = collect_tree_blocks(&content);
        let (_, body) = blocks.first().ok_or(SummaryError::NoTrees)?;
        return parse_newick(body, Some(&translate))
            .map_err(|reason| SummaryError::Parse { index: 0, reason });
    }
    let line = content
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or(SummaryError::NoTrees)?;
    parse_newick(line, None).map_err(|reason| SummaryError::Parse { index: 0, reason })
}

// ---------------------------------------------------------------------
// Newick parsing with annotations
// ---------------------------------------------------------------------

struct NewickParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    translate: Option<&'a HashMap<String, String>>,
}

/// Parses a Newick string carrying `[&...]` annotations into a
/// [`SummaryTree`]. Node heights are derived from branch lengths before
/// returning.
///
/// Annotations may appear after a node's label/subtree (node attributes)
/// and after the `:` before the branch length (branch attributes); both
/// land in the same per-node attribute map, matching how downstream
/// consumers treat them.
pub fn parse_newick(
    newick: &str,
    translate: Option<&HashMap<String, String>>,
) -> std::result::Result<SummaryTree, String> {
    let mut parser = NewickParser {
        chars: newick.trim().chars().peekable(),
        translate,
    };
    let mut tree = SummaryTree::new();
    parser.skip_ws();
    // leading rootedness marker ([&R] / [&U]) or comment before the tree
    while parser.chars.peek() == Some(&'[') {
        for c in parser.chars.by_ref() {
            if c == ']' {
                break;
            }
        }
        parser.skip_ws();
    }
    parser.subtree(&mut tree, None)?;
    parser.skip_ws();
    match parser.chars.next() {
        Some(';') | None => {}
        Some(c) => return Err(format!("unexpected trailing character '{c}'")),
    }
    tree.compute_heights();
    Ok(tree)
}

impl<'a> NewickParser<'a> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn subtree(&mut self, tree: &mut SummaryTree, parent: Option<usize>) -> std::result::Result<usize, String> {
        self.skip_ws();
        let id = tree.add_node(parent);
        if self.chars.peek() == Some(&'(') {
            self.chars.next();
            loop {
                self.subtree(tree, Some(id))?;
                self.skip_ws();
                match self.chars.next() {
                    Some(',') => continue,
                    Some(')') => break,
                    other => return Err(format!("expected ',' or ')', found {other:?}")),
                }
            }
            // optional internal-node label, ignored (ids are positional)
            let _ = self.token();
        } else {
            let label = self.token();
            if label.is_empty() {
                return Err("empty tip label".to_string());
            }
            let label = match self.translate {
                Some(map) => map.get(&label).cloned().unwrap_or(label),
                None => label,
            };
            tree.node_mut(id).taxon = Some(label);
        }

        self.skip_ws();
        if self.chars.peek() == Some(&'[') {
            self.annotations(tree, id)?;
        }
        self.skip_ws();
        if self.chars.peek() == Some(&':') {
            self.chars.next();
            self.skip_ws();
            if self.chars.peek() == Some(&'[') {
                self.annotations(tree, id)?;
            }
            let num = self.token();
            tree.node_mut(id).length = num
                .parse::<f64>()
                .map_err(|_| format!("bad branch length '{num}'"))?;
        }
        Ok(id)
    }

    /// Reads one bare or quoted token (label or number).
    fn token(&mut self) -> String {
        self.skip_ws();
        let mut out = String::new();
        if let Some(&quote) = self.chars.peek() {
            if quote == '\'' || quote == '"' {
                self.chars.next();
                for c in self.chars.by_ref() {
                    if c == quote {
                        break;
                    }
                    out.push(c);
                }
                return out;
            }
        }
        while let Some(&c) = self.chars.peek() {
            if matches!(c, '(' | ')' | ',' | ':' | ';' | '[' | ']') || c.is_whitespace() {
                break;
            }
            out.push(c);
            self.chars.next();
        }
        out
    }

    /// Parses one `[&name=value,...]` payload into the node's attributes.
    fn annotations(&mut self, tree: &mut SummaryTree, id: usize) -> std::result::Result<(), String> {
        self.chars.next(); // '['
        if self.chars.peek() == Some(&'&') {
            self.chars.next();
        }
        loop {
            self.skip_ws();
            let name = self.annotation_key();
            if name.is_empty() {
                return Err("empty annotation name".to_string());
            }
            self.skip_ws();
            let value = if self.chars.peek() == Some(&'=') {
                self.chars.next();
                self.annotation_value()?
            } else {
                // bare flag annotation
                Value::Boolean(true)
            };
            tree.set_attribute(id, &name, value);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => continue,
                Some(']') => return Ok(()),
                other => return Err(format!("expected ',' or ']' in annotation, found {other:?}")),
            }
        }
    }

    fn annotation_key(&mut self) -> String {
        self.skip_ws();
        if matches!(self.chars.peek(), Some('\'') | Some('"')) {
            return self.token();
        }
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if matches!(c, '=' | ',' | ']') || c.is_whitespace() {
                break;
            }
            out.push(c);
            self.chars.next();
        }
        out
    }

    /// One annotation value, tagged at ingestion: number, boolean, quoted
    /// or bare category, or a `{...}` numeric vector.
    fn annotation_value(&mut self) -> std::result::Result<Value, String> {
        self.skip_ws();
        match self.chars.peek() {
            Some('{') => {
                self.chars.next();
                let mut raw = Vec::new();
                loop {
                    self.skip_ws();
                    let item = self.annotation_item();
                    raw.push(item);
                    self.skip_ws();
                    match self.chars.next() {
                        Some(',') => continue,
                        Some('}') => break,
                        other => {
                            return Err(format!("expected ',' or '}}' in vector, found {other:?}"))
                        }
                    }
                }
                let numbers: Option<Vec<f64>> =
                    raw.iter().map(|s| s.parse::<f64>().ok()).collect();
                match numbers {
                    Some(v) => Ok(Value::Vector(v)),
                    // non-numeric set: kept as its category labels
                    None => Ok(Value::Categories(raw)),
                }
            }
            Some('\'') | Some('"') => Ok(Value::Category(self.token())),
            _ => {
                let item = self.annotation_item();
                if let Ok(x) = item.parse::<f64>() {
                    return Ok(Value::Real(x));
                }
                match item.as_str() {
                    "true" | "TRUE" => Ok(Value::Boolean(true)),
                    "false" | "FALSE" => Ok(Value::Boolean(false)),
                    _ => Ok(Value::Category(item)),
                }
            }
        }
    }

    fn annotation_item(&mut self) -> String {
        if matches!(self.chars.peek(), Some('\'') | Some('"')) {
            return self.token();
        }
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if matches!(c, ',' | '}' | ']') || c.is_whitespace() {
                break;
            }
            out.push(c);
            self.chars.next();
        }
        out
    }
}

// ---------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------

/// Writes the annotated target tree as a NEXUS file with taxa and
/// translate blocks. If `path` ends with `.gz` the output is
/// gzip-compressed.
///
/// Branch lengths are derived from the (possibly summarized) node heights,
/// `height(parent) − height(node)`, so the written geometry matches
/// whichever height policy ran.
pub fn write_annotated_tree<P: AsRef<Path>>(path: P, tree: &SummaryTree) -> Result<()> {
    let p = path.as_ref();
    let is_gz = p.to_string_lossy().ends_with(".gz");

    let mut out: Box<dyn Write> = if is_gz {
        let f = File::create(p)?;
        let enc = GzEncoder::new(f, Compression::default());
        Box::new(BufWriter::new(enc))
    } else {
        Box::new(BufWriter::new(File::create(p)?))
    };

    let mut tips: Vec<usize> = (0..tree.len()).filter(|&i| tree.is_tip(i)).collect();
    tips.sort_by(|&a, &b| {
        tree.node(a)
            .taxon
            .cmp(&tree.node(b).taxon)
    });
    let numbers: HashMap<usize, usize> =
        tips.iter().enumerate().map(|(k, &id)| (id, k + 1)).collect();

    writeln!(out, "#NEXUS")?;
    writeln!(out)?;
    writeln!(out, "Begin taxa;")?;
    writeln!(out, "\tDimensions ntax={};", tips.len())?;
    writeln!(out, "\tTaxlabels")?;
    for &tip in &tips {
        writeln!(out, "\t\t{}", quote_label(tree.node(tip).taxon.as_deref().unwrap_or("")))?;
    }
    writeln!(out, "\t\t;")?;
    writeln!(out, "End;")?;
    writeln!(out, "Begin trees;")?;
    writeln!(out, "\tTranslate")?;
    for (k, &tip) in tips.iter().enumerate() {
        let sep = if k + 1 < tips.len() { "," } else { "" };
        writeln!(
            out,
            "\t\t{} {}{}",
            k + 1,
            quote_label(tree.node(tip).taxon.as_deref().unwrap_or("")),
            sep
        )?;
    }
    writeln!(out, "\t\t;")?;
    let mut newick = String::new();
    format_node(tree, tree.root(), &numbers, &mut newick);
    writeln!(out, "tree TREE1 = [&R] {newick};")?;
    writeln!(out, "End;")?;
    out.flush()?;
    Ok(())
}

fn format_node(
    tree: &SummaryTree,
    id: usize,
    numbers: &HashMap<usize, usize>,
    out: &mut String,
) {
    let node = tree.node(id);
    if node.children.is_empty() {
        out.push_str(&numbers[&id].to_string());
    } else {
        out.push('(');
        for (k, &child) in node.children.iter().enumerate() {
            if k > 0 {
                out.push(',');
            }
            format_node(tree, child, numbers, out);
        }
        out.push(')');
    }

    if !node.attributes.is_empty() {
        // sorted for reproducible output
        let mut names: Vec<&String> = node.attributes.keys().collect();
        names.sort();
        out.push_str("[&");
        for (k, name) in names.iter().enumerate() {
            if k > 0 {
                out.push(',');
            }
            out.push_str(name);
            out.push('=');
            format_value(&node.attributes[*name], out);
        }
        out.push(']');
    }

    if let Some(parent) = node.parent {
        let length = tree.node(parent).height - node.height;
        out.push(':');
        out.push_str(&format_real(length));
    }
}

fn format_value(value: &Value, out: &mut String) {
    match value {
        Value::Real(x) => out.push_str(&format_real(*x)),
        Value::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Category(s) => out.push_str(&quote_label(s)),
        Value::Vector(v) => {
            out.push('{');
            for (k, x) in v.iter().enumerate() {
                if k > 0 {
                    out.push(',');
                }
                out.push_str(&format_real(*x));
            }
            out.push('}');
        }
        Value::Categories(set) => {
            out.push('{');
            for (k, s) in set.iter().enumerate() {
                if k > 0 {
                    out.push(',');
                }
                out.push('"');
                out.push_str(s);
                out.push('"');
            }
            out.push('}');
        }
    }
}

fn format_real(x: f64) -> String {
    // trailing ".0" kept off integral values to match the source format
    if x == x.trunc() && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

fn quote_label(label: &str) -> String {
    let plain = label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '+' | '%' | '|'));
    if plain && !label.is_empty() {
        label.to_string()
    } else {
        format!("'{label}'")
    }
}
