//! Parsing and emission of `Packages` index files.
//!
//! The on-disk format is a sequence of control paragraphs separated by blank
//! lines. Parsing keeps field order and continuation lines intact, so a
//! re-emitted file differs from its input only in entry ordering.

use crate::error::AptIndexError;
use crate::Result;
use std::fmt;

/// One control paragraph: ordered field names and values.
///
/// Multi-line values keep their continuation lines (including the leading
/// space) embedded in the stored value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Paragraph {
    fields: Vec<(String, String)>,
}

impl Paragraph {
    /// Create an empty paragraph.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Parse a single paragraph (no blank lines inside).
    pub fn parse(block: &str) -> Result<Self> {
        let mut fields: Vec<(String, String)> = Vec::new();
        for line in block.lines() {
            if line.starts_with(' ') || line.starts_with('\t') {
                match fields.last_mut() {
                    Some((_, value)) => {
                        value.push('\n');
                        value.push_str(line);
                    }
                    None => {
                        return Err(AptIndexError::invalid_paragraph(format!(
                            "continuation line without a preceding field: {:?}",
                            line
                        )))
                    }
                }
            } else if let Some((name, value)) = line.split_once(':') {
                fields.push((name.trim().to_string(), value.trim().to_string()));
            } else {
                return Err(AptIndexError::invalid_paragraph(format!(
                    "malformed line: {:?}",
                    line
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Value of the named field, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set a field, replacing an existing value or appending a new field.
    pub fn set<S: Into<String>>(&mut self, name: &str, value: S) {
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| field == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Iterate over fields in their original order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether the paragraph has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Paragraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

/// A binary package entry in a `Packages` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPackage {
    name: String,
    version: String,
    architecture: String,
    paragraph: Paragraph,
}

impl BinaryPackage {
    /// Create a minimal entry carrying only the required fields.
    pub fn new(name: &str, version: &str, architecture: &str) -> Self {
        let mut paragraph = Paragraph::new();
        paragraph.set("Package", name);
        paragraph.set("Version", version);
        paragraph.set("Architecture", architecture);
        Self {
            name: name.to_string(),
            version: version.to_string(),
            architecture: architecture.to_string(),
            paragraph,
        }
    }

    /// Wrap a parsed paragraph, checking the fields every entry must carry.
    pub fn from_paragraph(paragraph: Paragraph) -> Result<Self> {
        let name = paragraph
            .get("Package")
            .ok_or_else(|| AptIndexError::missing_field("Package"))?
            .to_string();
        let version = paragraph
            .get("Version")
            .ok_or_else(|| AptIndexError::missing_field("Version"))?
            .to_string();
        let architecture = paragraph
            .get("Architecture")
            .ok_or_else(|| AptIndexError::missing_field("Architecture"))?
            .to_string();
        Ok(Self {
            name,
            version,
            architecture,
            paragraph,
        })
    }

    /// Package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Package version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Package architecture.
    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// Value of an arbitrary field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.paragraph.get(name)
    }

    /// The underlying paragraph.
    pub fn paragraph(&self) -> &Paragraph {
        &self.paragraph
    }
}

impl fmt::Display for BinaryPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.paragraph)
    }
}

/// An in-memory `Packages` file.
#[derive(Debug, Clone, Default)]
pub struct PackageIndex {
    packages: Vec<BinaryPackage>,
}

impl PackageIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            packages: Vec::new(),
        }
    }

    /// Parse the contents of a `Packages` file.
    pub fn parse(content: &str) -> Result<Self> {
        let mut packages = Vec::new();
        for block in content.split("\n\n") {
            if block.trim().is_empty() {
                continue;
            }
            let paragraph = Paragraph::parse(block.trim_end_matches('\n'))?;
            packages.push(BinaryPackage::from_paragraph(paragraph)?);
        }
        Ok(Self { packages })
    }

    /// Add an entry.
    pub fn push(&mut self, package: BinaryPackage) {
        self.packages.push(package);
    }

    /// Entries in their current order.
    pub fn packages(&self) -> &[BinaryPackage] {
        &self.packages
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Sort entries by package name, then version.
    pub fn sort(&mut self) {
        self.packages.sort_by(|a, b| {
            a.name()
                .cmp(b.name())
                .then_with(|| a.version().cmp(b.version()))
        });
    }
}

impl fmt::Display for PackageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, package) in self.packages.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", package)?;
        }
        Ok(())
    }
}
