use std::env::args;

use anyhow::{Context, Result};
use sharc::database::Database;
use sharc::query::exec::QueryOutput;

fn main() -> Result<()> {
    let path = args().nth(1).context("usage: sharc <database-file> [sql]")?;
    let sql = args().nth(2).unwrap_or_else(|| "SELECT * FROM sqlite_master".to_string());

    let db = Database::open(&path)?;

    match db.query(&sql)? {
        QueryOutput::Rows { columns, rows } => {
            println!("{}", columns.join(" | "));
            for row in rows.iter().take(20) {
                dbg!(row);
            }
            println!("{} row(s)", rows.len());
        }
        QueryOutput::Explain(plan) => println!("{plan}"),
    }

    Ok(())
}
