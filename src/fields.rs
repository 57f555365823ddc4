//! Field declarations: which columns get encrypted, and how
//!
//! Operators declare sensitive columns in a field map file (JSON or YAML).
//! The registry validates the declarations once at load time; everything
//! downstream (codec, rotation, migration, monitoring) works strictly off
//! the declared set, so only whitelisted identifiers ever reach SQL.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Semantic type of a protected field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// National tax identifier (codice fiscale, SSN, ...)
    TaxId,
    /// E-mail address
    Email,
    /// Unstructured free text (notes, medical remarks)
    FreeText,
    /// Monetary amount stored as text
    Amount,
}

impl FieldType {
    /// Parse a field type from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "tax_id" | "taxid" => Some(Self::TaxId),
            "email" => Some(Self::Email),
            "free_text" | "freetext" | "text" => Some(Self::FreeText),
            "amount" | "money" => Some(Self::Amount),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaxId => write!(f, "tax id"),
            Self::Email => write!(f, "email"),
            Self::FreeText => write!(f, "free text"),
            Self::Amount => write!(f, "amount"),
        }
    }
}

/// Sensitivity class driving reporting priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Loss is reportable (identifiers, health data)
    Critical,
    /// Personal data under ordinary protection duty
    High,
    /// Sensitive by policy rather than by regulation
    Standard,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self::Standard
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Standard => write!(f, "standard"),
        }
    }
}

/// A declared sensitive column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Table the column lives in
    pub table: String,

    /// Column name
    pub column: String,

    /// Semantic type of the values
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Sensitivity class
    #[serde(default)]
    pub sensitivity: Sensitivity,
}

impl FieldDescriptor {
    /// Create a new descriptor
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        field_type: FieldType,
        sensitivity: Sensitivity,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            field_type,
            sensitivity,
        }
    }

    /// The `table.column` name used in errors, audit records, and reports
    ///
    /// Also the associated-data context bound into every envelope written
    /// for this field.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }

    /// Validate the descriptor
    pub fn validate(&self) -> VaultResult<()> {
        if !is_valid_identifier(&self.table) {
            return Err(VaultError::Validation(format!(
                "invalid table name: '{}'",
                self.table
            )));
        }
        if !is_valid_identifier(&self.column) {
            return Err(VaultError::Validation(format!(
                "invalid column name: '{}'",
                self.column
            )));
        }
        // The fv_ prefix is reserved for the vault's own control tables
        if self.table.starts_with("fv_") {
            return Err(VaultError::Validation(format!(
                "table name '{}' uses the reserved fv_ prefix",
                self.table
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            self.qualified_name(),
            self.field_type,
            self.sensitivity
        )
    }
}

/// On-disk shape of the field map file
#[derive(Debug, Default, Serialize, Deserialize)]
struct FieldMapFile {
    #[serde(default)]
    fields: Vec<FieldDescriptor>,
}

/// The validated set of declared fields
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    fields: Vec<FieldDescriptor>,
}

impl FieldRegistry {
    /// Build a registry from descriptors, validating each and rejecting
    /// duplicate declarations
    pub fn from_descriptors(fields: Vec<FieldDescriptor>) -> VaultResult<Self> {
        for field in &fields {
            field.validate()?;
        }
        for (i, field) in fields.iter().enumerate() {
            let dup = fields[..i]
                .iter()
                .any(|f| f.table == field.table && f.column == field.column);
            if dup {
                return Err(VaultError::Validation(format!(
                    "field declared twice: {}",
                    field.qualified_name()
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Load a registry from a JSON or YAML field map file
    pub fn load(path: &Path) -> VaultResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VaultError::Config(format!("failed to read field map {}: {}", path.display(), e))
        })?;

        let file: FieldMapFile = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Self::from_descriptors(file.fields)
    }

    /// Write an empty field map template for `init` to create
    pub fn write_template(path: &Path) -> VaultResult<()> {
        let template = FieldMapFile::default();
        let json = serde_json::to_string_pretty(&template)?;
        std::fs::write(path, json + "\n")?;
        Ok(())
    }

    /// Look up a declared field
    pub fn get(&self, table: &str, column: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.table == table && f.column == column)
    }

    /// Look up a declared field, erroring when absent
    pub fn require(&self, table: &str, column: &str) -> VaultResult<&FieldDescriptor> {
        self.get(table, column)
            .ok_or_else(|| VaultError::field_not_found(format!("{}.{}", table, column)))
    }

    /// All declared fields of one table, in declaration order
    pub fn fields_for_table(&self, table: &str) -> Vec<&FieldDescriptor> {
        self.fields.iter().filter(|f| f.table == table).collect()
    }

    /// Distinct protected tables, in declaration order
    pub fn tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = Vec::new();
        for field in &self.fields {
            if !tables.contains(&field.table.as_str()) {
                tables.push(&field.table);
            }
        }
        tables
    }

    /// Whether any field is declared on this table
    pub fn contains_table(&self, table: &str) -> bool {
        self.fields.iter().any(|f| f.table == table)
    }

    /// All declared fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Number of declared fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Identifiers go into SQL quoted, but only whitelisted shapes get that far
pub(crate) fn is_valid_identifier(s: &str) -> bool {
    if s.is_empty() || s.len() > 64 {
        return false;
    }
    let mut chars = s.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("patients", "tax_code", FieldType::TaxId, Sensitivity::Critical),
            FieldDescriptor::new("patients", "notes", FieldType::FreeText, Sensitivity::High),
            FieldDescriptor::new("users", "email", FieldType::Email, Sensitivity::High),
        ]
    }

    #[test]
    fn test_registry_lookups() {
        let registry = FieldRegistry::from_descriptors(sample_fields()).unwrap();

        assert_eq!(registry.len(), 3);
        assert!(registry.get("patients", "tax_code").is_some());
        assert!(registry.get("patients", "email").is_none());
        assert_eq!(registry.fields_for_table("patients").len(), 2);
        assert_eq!(registry.tables(), vec!["patients", "users"]);
        assert!(registry.contains_table("users"));
        assert!(!registry.contains_table("orders"));
    }

    #[test]
    fn test_require_unknown_field() {
        let registry = FieldRegistry::from_descriptors(sample_fields()).unwrap();
        let err = registry.require("orders", "total").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let mut fields = sample_fields();
        fields.push(fields[0].clone());
        let result = FieldRegistry::from_descriptors(fields);
        assert!(matches!(result, Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let fields = vec![FieldDescriptor::new(
            "patients; DROP TABLE patients",
            "tax_code",
            FieldType::TaxId,
            Sensitivity::Critical,
        )];
        let result = FieldRegistry::from_descriptors(fields);
        assert!(matches!(result, Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_reserved_prefix_rejected() {
        let fields = vec![FieldDescriptor::new(
            "fv_key_versions",
            "wrapped_key",
            FieldType::FreeText,
            Sensitivity::Standard,
        )];
        let result = FieldRegistry::from_descriptors(fields);
        assert!(matches!(result, Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_valid_identifier("patients"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("col_2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2col"));
        assert!(!is_valid_identifier("name with spaces"));
        assert!(!is_valid_identifier("nome\"quoted"));
        assert!(!is_valid_identifier(&"x".repeat(65)));
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fields.json");
        std::fs::write(
            &path,
            r#"{
  "fields": [
    { "table": "patients", "column": "tax_code", "type": "tax_id", "sensitivity": "critical" },
    { "table": "users", "column": "email", "type": "email" }
  ]
}"#,
        )
        .unwrap();

        let registry = FieldRegistry::load(&path).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get("patients", "tax_code").unwrap().field_type,
            FieldType::TaxId
        );
        // Sensitivity defaults to standard when omitted
        assert_eq!(
            registry.get("users", "email").unwrap().sensitivity,
            Sensitivity::Standard
        );
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fields.yaml");
        std::fs::write(
            &path,
            "fields:\n  - table: patients\n    column: tax_code\n    type: tax_id\n    sensitivity: critical\n",
        )
        .unwrap();

        let registry = FieldRegistry::load(&path).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("patients", "tax_code").unwrap().sensitivity,
            Sensitivity::Critical
        );
    }

    #[test]
    fn test_write_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fields.json");
        FieldRegistry::write_template(&path).unwrap();

        let registry = FieldRegistry::load(&path).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_qualified_name() {
        let field = sample_fields().remove(0);
        assert_eq!(field.qualified_name(), "patients.tax_code");
        assert_eq!(format!("{}", field), "patients.tax_code (tax id, critical)");
    }

    #[test]
    fn test_field_type_parsing() {
        assert_eq!(FieldType::parse("tax-id"), Some(FieldType::TaxId));
        assert_eq!(FieldType::parse("EMAIL"), Some(FieldType::Email));
        assert_eq!(FieldType::parse("free_text"), Some(FieldType::FreeText));
        assert_eq!(FieldType::parse("bogus"), None);
    }
}
