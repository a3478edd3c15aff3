use chrono::{DateTime, Utc};
use sdata::{Catalog, Entity, Field};
use std::sync::OnceLock;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Contact {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub work_phone: Option<String>,
    pub do_not_email: bool,
    pub create_date: Option<DateTime<Utc>>,
    pub account: String,
}

impl Entity for Contact {
    const KIND: &'static str = "Contact";

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: OnceLock<Vec<Field<Contact>>> = OnceLock::new();
        FIELDS.get_or_init(|| {
            vec![
                Field::new(
                    "FirstName",
                    |c: &Contact| &c.first_name,
                    |c: &mut Contact| &mut c.first_name,
                ),
                Field::new(
                    "LastName",
                    |c: &Contact| &c.last_name,
                    |c: &mut Contact| &mut c.last_name,
                ),
                Field::new("Email", |c: &Contact| &c.email, |c: &mut Contact| &mut c.email),
                Field::new(
                    "WorkPhone",
                    |c: &Contact| &c.work_phone,
                    |c: &mut Contact| &mut c.work_phone,
                ),
                Field::new(
                    "DoNotEmail",
                    |c: &Contact| &c.do_not_email,
                    |c: &mut Contact| &mut c.do_not_email,
                ),
                Field::new(
                    "CreateDate",
                    |c: &Contact| &c.create_date,
                    |c: &mut Contact| &mut c.create_date,
                )
                .read_only(),
                Field::new(
                    "Account",
                    |c: &Contact| &c.account,
                    |c: &mut Contact| &mut c.account,
                )
                .relationship(),
            ]
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Account {
    pub account_name: String,
    pub industry: Option<String>,
    pub employees: Option<i32>,
    pub revenue: Option<f64>,
    pub create_date: Option<DateTime<Utc>>,
}

impl Entity for Account {
    const KIND: &'static str = "Account";

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: OnceLock<Vec<Field<Account>>> = OnceLock::new();
        FIELDS.get_or_init(|| {
            vec![
                Field::new(
                    "AccountName",
                    |a: &Account| &a.account_name,
                    |a: &mut Account| &mut a.account_name,
                ),
                Field::new(
                    "Industry",
                    |a: &Account| &a.industry,
                    |a: &mut Account| &mut a.industry,
                ),
                Field::new(
                    "Employees",
                    |a: &Account| &a.employees,
                    |a: &mut Account| &mut a.employees,
                ),
                Field::new(
                    "Revenue",
                    |a: &Account| &a.revenue,
                    |a: &mut Account| &mut a.revenue,
                ),
                Field::new(
                    "CreateDate",
                    |a: &Account| &a.create_date,
                    |a: &mut Account| &mut a.create_date,
                )
                .read_only(),
            ]
        })
    }
}

/// Resource kinds known to the CLI.
pub fn catalog() -> Catalog {
    Catalog::new()
        .with::<Contact>("contacts")
        .with::<Account>("accounts")
}
