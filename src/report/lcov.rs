// LCOV report emitter.
//
// Entries are grouped by source file and files are rendered in sorted
// order, so identical inputs always produce identical bytes. Within a file,
// functions and lines appear in first-seen (decode) order.
//
// Per file:
//
//   SF:<path>
//   FN:<line>,<name>      } once per function
//   FNDA:<hits>,<name>    }
//   DA:<line>,<count>       once per distinct line, first-seen count wins
//   FNF / FNH / LF / LH
//   end_of_record

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use crate::format::{CounterSnapshot, MetaEntry};

/// Per-function totals within one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSummary {
    pub name: Arc<str>,
    /// Start line of the first entry seen for this function.
    pub line: u32,
    /// Sum of every counter belonging to the function.
    pub hits: u64,
}

/// Hit count recorded for one source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineHit {
    pub line: u32,
    pub count: u64,
}

/// Everything reported for one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: Arc<str>,
    pub functions: Vec<FunctionSummary>,
    pub lines: Vec<LineHit>,
}

impl FileRecord {
    pub fn functions_found(&self) -> usize {
        self.functions.len()
    }

    pub fn functions_hit(&self) -> usize {
        self.functions.iter().filter(|f| f.hits > 0).count()
    }

    pub fn lines_found(&self) -> usize {
        self.lines.len()
    }

    pub fn lines_hit(&self) -> usize {
        self.lines.iter().filter(|l| l.count > 0).count()
    }

    fn build(path: &Arc<str>, entries: &[&MetaEntry], counts: &CounterSnapshot) -> Self {
        let mut functions: Vec<FunctionSummary> = Vec::new();
        let mut by_name: HashMap<&str, usize> = HashMap::new();
        let mut lines = Vec::new();
        let mut seen_lines = HashSet::new();

        for entry in entries {
            // Metadata may be ahead of the counter snapshot.
            let Some(count) = counts.get(entry.counter_id) else {
                continue;
            };

            let idx = *by_name.entry(&*entry.func_name).or_insert_with(|| {
                functions.push(FunctionSummary {
                    name: Arc::clone(&entry.func_name),
                    line: entry.line_start,
                    hits: 0,
                });
                functions.len() - 1
            });
            functions[idx].hits = functions[idx].hits.saturating_add(count);

            if seen_lines.insert(entry.line_start) {
                lines.push(LineHit {
                    line: entry.line_start,
                    count,
                });
            }
        }

        Self {
            path: Arc::clone(path),
            functions,
            lines,
        }
    }
}

impl fmt::Display for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SF:{}", self.path)?;
        for func in &self.functions {
            writeln!(f, "FN:{},{}", func.line, func.name)?;
            writeln!(f, "FNDA:{},{}", func.hits, func.name)?;
        }
        for line in &self.lines {
            writeln!(f, "DA:{},{}", line.line, line.count)?;
        }
        writeln!(f, "FNF:{}", self.functions_found())?;
        writeln!(f, "FNH:{}", self.functions_hit())?;
        writeln!(f, "LF:{}", self.lines_found())?;
        writeln!(f, "LH:{}", self.lines_hit())?;
        writeln!(f, "end_of_record")
    }
}

/// A joined coverage report, files in sorted path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub files: Vec<FileRecord>,
}

impl Report {
    /// Join `entries` to `counts`.
    ///
    /// Entries whose counter id is beyond the snapshot are skipped; this is
    /// never an error.
    pub fn build(entries: &[MetaEntry], counts: &CounterSnapshot) -> Self {
        let mut by_file: BTreeMap<&Arc<str>, Vec<&MetaEntry>> = BTreeMap::new();
        for entry in entries {
            by_file.entry(&entry.file_path).or_default().push(entry);
        }
        let files = by_file
            .into_iter()
            .map(|(path, entries)| FileRecord::build(path, &entries, counts))
            .collect();
        Self { files }
    }

    /// Render the LCOV text.
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Stream the LCOV text to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for file in &self.files {
            write!(w, "{file}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.files.iter().try_for_each(|file| write!(f, "{file}"))
    }
}

/// Join entries to counts and render LCOV text in one step.
pub fn emit_lcov(entries: &[MetaEntry], counts: &[u64]) -> String {
    Report::build(entries, &CounterSnapshot::new(counts.to_vec())).render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::CounterId;

    fn entry(file: &str, func: &str, line: u32, id: usize) -> MetaEntry {
        MetaEntry {
            file_path: Arc::from(file),
            func_name: Arc::from(func),
            line_start: line,
            line_end: line + 5,
            counter_id: CounterId(id),
        }
    }

    #[test]
    fn literal_scenario() {
        let entries = vec![entry("main.go", "foo", 10, 0)];
        assert_eq!(
            emit_lcov(&entries, &[5]),
            "SF:main.go\nFN:10,foo\nFNDA:5,foo\nDA:10,5\nFNF:1\nFNH:1\nLF:1\nLH:1\nend_of_record\n"
        );
    }

    #[test]
    fn files_are_sorted() {
        let entries = vec![
            entry("z.go", "z", 1, 0),
            entry("a.go", "a", 1, 1),
            entry("m.go", "m", 1, 2),
        ];
        let report = Report::build(&entries, &CounterSnapshot::new(vec![1, 1, 1]));
        let paths: Vec<&str> = report.files.iter().map(|f| &*f.path).collect();
        assert_eq!(paths, vec!["a.go", "m.go", "z.go"]);
    }

    #[test]
    fn function_hits_are_summed_and_first_line_count_wins() {
        let entries = vec![
            entry("a.go", "f", 3, 0),
            entry("a.go", "f", 3, 1),
            entry("a.go", "f", 3, 2),
        ];
        let text = emit_lcov(&entries, &[0, 4, 6]);
        assert!(text.contains("FNDA:10,f\n"));
        assert!(text.contains("DA:3,0\n"));
        assert_eq!(text.matches("DA:").count(), 1);
        assert!(text.contains("FNH:1\n"));
        assert!(text.contains("LF:1\nLH:0\n"));
    }

    #[test]
    fn short_snapshot_skips_trailing_entries() {
        let entries = vec![
            entry("a.go", "f", 1, 0),
            entry("a.go", "g", 9, 1),
            entry("b.go", "h", 2, 2),
        ];
        let text = emit_lcov(&entries, &[7]);
        assert_eq!(
            text,
            "SF:a.go\nFN:1,f\nFNDA:7,f\nDA:1,7\nFNF:1\nFNH:1\nLF:1\nLH:1\nend_of_record\n\
             SF:b.go\nFNF:0\nFNH:0\nLF:0\nLH:0\nend_of_record\n"
        );
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(emit_lcov(&[], &[]), "");
        assert_eq!(emit_lcov(&[], &[1, 2, 3]), "");
    }

    #[test]
    fn write_to_matches_render() {
        let entries = vec![entry("a.go", "f", 1, 0), entry("b.go", "g", 2, 1)];
        let report = Report::build(&entries, &CounterSnapshot::new(vec![1, 0]));
        let mut out = Vec::new();
        report.write_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), report.render());
        assert_eq!(report.files[1].functions_hit(), 0);
    }
}
