use serde::Serialize;

/// Required and optional header names for one CSV layout.
#[derive(Debug, Clone, Copy)]
pub struct HeaderSchema {
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

pub const CASHBOOK_SCHEMA: HeaderSchema = HeaderSchema {
    required: &["Date", "Remark", "Entry By", "Cash In", "Cash Out"],
    optional: &["Category", "Time", "Mode", "Balance"],
};

// The self-export is not gated on headers; rows are checked by position.
pub const PENNYWISE_SCHEMA: HeaderSchema = HeaderSchema {
    required: &[],
    optional: &[
        "Date",
        "Description",
        "Category",
        "Payment Mode",
        "Paid By",
        "Amount",
        "Type",
    ],
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub success: bool,
    pub missing_required_headers: Vec<String>,
    pub present_headers: Vec<String>,
    pub total_rows: usize,
}

impl ValidationVerdict {
    pub fn message(&self) -> String {
        if self.success {
            "CSV file validation successful".to_string()
        } else {
            format!(
                "CSV file is missing required headers: {}",
                self.missing_required_headers.join(", ")
            )
        }
    }
}

impl HeaderSchema {
    /// Missing headers come back in schema order, present ones in file
    /// order. Headers outside the schema are ignored.
    pub fn validate(&self, headers: &[String], total_rows: usize) -> ValidationVerdict {
        let missing_required_headers: Vec<String> = self
            .required
            .iter()
            .filter(|h| !headers.iter().any(|actual| actual == *h))
            .map(|h| h.to_string())
            .collect();

        let mut present_headers: Vec<String> = Vec::new();
        for header in headers {
            if self.knows(header) && !present_headers.contains(header) {
                present_headers.push(header.clone());
            }
        }

        ValidationVerdict {
            success: missing_required_headers.is_empty(),
            missing_required_headers,
            present_headers,
            total_rows,
        }
    }

    pub fn knows(&self, header: &str) -> bool {
        self.required.contains(&header) || self.optional.contains(&header)
    }
}
