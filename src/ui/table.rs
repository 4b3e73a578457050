use tabled::{settings::Style, Table, Tabled};
use crate::storage::ReferenceRecord;
use crate::ui::Icons;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
pub struct ReferenceRow {
    #[tabled(rename = "Reference")]
    pub name: String,
    #[tabled(rename = "Type")]
    pub ref_type: String,
    #[tabled(rename = "Commits")]
    pub commits: usize,
    #[tabled(rename = "Tip")]
    pub tip: String,
}

impl From<&ReferenceRecord> for ReferenceRow {
    fn from(record: &ReferenceRecord) -> Self {
        Self {
            name: record.name.clone(),
            ref_type: match record.ref_type.as_str() {
                "tag" => format!("{} tag", Icons::TAG),
                other => format!("{} {}", Icons::BRANCH, other),
            },
            commits: record.commits,
            tip: record
                .last_commit
                .as_deref()
                .map(|hash| hash.chars().take(10).collect())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, String)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

pub fn references_table(records: &[ReferenceRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }
    let rows: Vec<ReferenceRow> = records.iter().map(ReferenceRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}
