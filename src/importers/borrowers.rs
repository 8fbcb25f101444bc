// Borrowers: upsert by borrower code, then by exact name.
// Rows without a code get one from the initials generator.

use super::{EntityImporter, RowOutcome, BORROWER_CODE_ALIASES, BORROWER_NAME_ALIASES};
use crate::borrower_id::BorrowerIdGenerator;
use crate::csv_source::CsvRow;
use crate::db::{self, Borrower, EntityKind};
use crate::error::RowResult;
use crate::normalize::{normalize_phone, split_name};
use rusqlite::Connection;
use std::collections::HashSet;

const FIRST_NAME_ALIASES: &[&str] = &["First Name", "FirstName", "first_name", "Given Name"];
const LAST_NAME_ALIASES: &[&str] = &["Last Name", "LastName", "last_name", "Surname"];
const PHONE_ALIASES: &[&str] = &[
    "Phone Number",
    "Phone",
    "Telephone",
    "Mobile",
    "Contact",
    "phone_number",
];
const EMAIL_ALIASES: &[&str] = &["Email", "Email Address", "email"];
const NATIONAL_ID_ALIASES: &[&str] = &["National ID", "NIN", "ID Number", "national_id"];
const ADDRESS_ALIASES: &[&str] = &["Address", "Location", "Village", "District"];
const OCCUPATION_ALIASES: &[&str] = &["Occupation", "Business", "Business Type"];

pub struct BorrowerImporter {
    /// Seeded from the database on first use
    generator: Option<BorrowerIdGenerator>,
    /// Codes taken from the CSV during this run
    claimed: HashSet<String>,
}

impl BorrowerImporter {
    pub fn new() -> Self {
        BorrowerImporter {
            generator: None,
            claimed: HashSet::new(),
        }
    }

    fn generator(&mut self, conn: &Connection) -> RowResult<&mut BorrowerIdGenerator> {
        if self.generator.is_none() {
            let existing = db::all_borrower_codes(conn)?;
            self.generator = Some(BorrowerIdGenerator::with_existing(existing));
        }
        Ok(self.generator.get_or_insert_with(BorrowerIdGenerator::new))
    }

    fn names(row: &CsvRow) -> Option<(String, String)> {
        if let Some(first) = row.get_any(FIRST_NAME_ALIASES) {
            let last = row.get_any(LAST_NAME_ALIASES).unwrap_or("");
            return Some((first.to_string(), last.to_string()));
        }

        row.get_any(BORROWER_NAME_ALIASES).map(split_name)
    }
}

impl Default for BorrowerImporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-empty CSV values win over stored ones
fn merge(target: &mut Option<String>, incoming: Option<String>) {
    if incoming.is_some() {
        *target = incoming;
    }
}

impl EntityImporter for BorrowerImporter {
    fn entity(&self) -> EntityKind {
        EntityKind::Borrowers
    }

    fn import_row(&mut self, conn: &Connection, row: &CsvRow) -> RowResult<RowOutcome> {
        let (first_name, last_name) = match Self::names(row) {
            Some(names) => names,
            None => return Ok(RowOutcome::Skipped("no borrower name".to_string())),
        };

        let code = row.get_any(BORROWER_CODE_ALIASES).map(|c| c.trim().to_uppercase());
        let phone = row.get_any(PHONE_ALIASES).map(normalize_phone);
        let email = row.text(EMAIL_ALIASES);
        let national_id = row.text(NATIONAL_ID_ALIASES);
        let address = row.text(ADDRESS_ALIASES);
        let occupation = row.text(OCCUPATION_ALIASES);

        let existing = match &code {
            Some(c) => db::find_borrower_by_code(conn, c)?,
            None => None,
        };
        let existing = match existing {
            Some(b) => Some(b),
            // a name match already holding another CSV code is a namesake
            None => db::find_borrower_by_name(conn, &first_name, &last_name)?
                .filter(|b| code.is_none() || !self.claimed.contains(&b.borrower_code.to_uppercase())),
        };

        if let Some(mut borrower) = existing {
            if let Some(c) = &code {
                if !borrower.borrower_code.eq_ignore_ascii_case(c) {
                    tracing::info!(
                        old = %borrower.borrower_code,
                        new = %c,
                        "borrower code taken from CSV"
                    );
                    self.generator(conn)?.reserve(c);
                    borrower.borrower_code = c.clone();
                }
                self.claimed.insert(c.clone());
            }
            borrower.first_name = first_name;
            borrower.last_name = last_name;
            merge(&mut borrower.phone, phone);
            merge(&mut borrower.email, email);
            merge(&mut borrower.national_id, national_id);
            merge(&mut borrower.address, address);
            merge(&mut borrower.occupation, occupation);
            db::update_borrower(conn, &borrower)?;
            return Ok(RowOutcome::Updated(borrower.borrower_code));
        }

        if let Some(c) = &code {
            self.claimed.insert(c.clone());
        }
        let generator = self.generator(conn)?;
        let code = match code {
            Some(c) => {
                generator.reserve(&c);
                c
            }
            None => generator.generate(&first_name, &last_name),
        };

        let mut borrower = Borrower::new(&code, &first_name, &last_name);
        borrower.phone = phone;
        borrower.email = email;
        borrower.national_id = national_id;
        borrower.address = address;
        borrower.occupation = occupation;

        db::insert_borrower(conn, &borrower)?;
        Ok(RowOutcome::Inserted(code))
    }
}
