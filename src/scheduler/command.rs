//! # Compute Command Templating
//!
//! Builds the per-shard argv for the external compute tool. The argument
//! template is split on whitespace once; each word may contain the
//! placeholders `{partition}`, `{shard}`, `{start}`, `{end}`, `{reference}`
//! and `{output}`.
//!
//! ```text
//! impute2 -m map/{partition}.map -l {reference} -int {start} {end} -o {output}
//! ```

use std::path::Path;

use crate::error::{ChunkjobError, Result};

const PLACEHOLDERS: [&str; 6] = ["partition", "shard", "start", "end", "reference", "output"];

/// Values substituted into the template for one shard
#[derive(Clone, Copy, Debug)]
pub struct ShardContext<'a> {
    pub partition: &'a str,
    pub shard: u32,
    pub start: u64,
    pub end: u64,
    pub reference: &'a Path,
    pub output: &'a Path,
}

impl ShardContext<'_> {
    fn value(&self, name: &str) -> String {
        match name {
            "partition" => self.partition.to_string(),
            "shard" => self.shard.to_string(),
            "start" => self.start.to_string(),
            "end" => self.end.to_string(),
            "reference" => self.reference.display().to_string(),
            "output" => self.output.display().to_string(),
            _ => unreachable!("placeholders are validated at construction"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputeCommand {
    tool: String,
    args: Vec<String>,
}

impl ComputeCommand {
    /// Parse an argument template, rejecting unknown or unterminated placeholders.
    pub fn new(tool: impl Into<String>, template: &str) -> Result<Self> {
        let args: Vec<String> = template.split_whitespace().map(String::from).collect();
        for arg in &args {
            for name in placeholders(arg)? {
                if !PLACEHOLDERS.contains(&name) {
                    return Err(ChunkjobError::config(format!(
                        "unknown placeholder {{{}}} in tool arguments; expected one of {:?}",
                        name, PLACEHOLDERS
                    )));
                }
            }
        }
        Ok(Self {
            tool: tool.into(),
            args,
        })
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Full argv for one shard, program first
    pub fn render(&self, ctx: &ShardContext<'_>) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.tool.clone());
        argv.extend(self.args.iter().map(|a| substitute(a, ctx)));
        argv
    }
}

/// Placeholder names in one word
fn placeholders(word: &str) -> Result<Vec<&str>> {
    let mut names = Vec::new();
    let mut rest = word;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            ChunkjobError::config(format!("unterminated placeholder in {:?}", word))
        })?;
        names.push(&after[..close]);
        rest = &after[close + 1..];
    }
    Ok(names)
}

fn substitute(word: &str, ctx: &ShardContext<'_>) -> String {
    let mut out = String::with_capacity(word.len());
    let mut rest = word;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        // Validated in `new`
        let close = after.find('}').unwrap_or(after.len());
        out.push_str(&ctx.value(&after[..close]));
        rest = after.get(close + 1..).unwrap_or("");
    }
    out.push_str(rest);
    out
}
