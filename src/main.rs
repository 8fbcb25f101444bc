use anyhow::{bail, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use rusqlite::Connection;
use serde::Serialize;

use mfi_backoffice::config::{self, CliArgs, Command, Config, NotifyTask, RepairTask};
use mfi_backoffice::normalize::format_ugx;
use mfi_backoffice::notifications::{Channel, NotificationService};
use mfi_backoffice::reports::{self, BorrowerExposure, MonthlyCollection, OverdueLoan, PortfolioSummary};
use mfi_backoffice::{
    importer_for, open_database, repair, run_import, run_migration, CreditRequest, CsvTable,
    EntityKind, ImportStats, MigrationOptions, ReconciliationEngine,
};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

fn main() -> Result<()> {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    config::init_logging(&config.logging);

    match &cli.command {
        Command::Migrate { fresh } => run_migrate(&config, *fresh),
        Command::Import { entity, file } => run_import_file(&config, entity, file),
        Command::Reconcile { entity, file } => run_reconcile(&config, entity, file),
        Command::Repair { task } => run_repair(&config, task),
        Command::Report { as_of, json } => run_report(&config, *as_of, *json),
        Command::Score { amount, purpose, term } => run_score(*amount, purpose, *term),
        Command::Notify { task } => run_notify(&config, task),
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn parse_entity(name: &str) -> Result<EntityKind> {
    match EntityKind::parse(name) {
        Some(e) => Ok(e),
        None => bail!(
            "unknown entity '{}' (expected one of: {})",
            name,
            EntityKind::IMPORT_ORDER
                .iter()
                .map(|e| e.name())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn open(config: &Config) -> Result<Connection> {
    println!("\n🔧 Opening database {}...", config.database.path.display());
    let conn = open_database(&config.database.path)?;
    println!("✓ Database ready (WAL mode)");
    Ok(conn)
}

fn print_stats(stats: &ImportStats) {
    let mark = if stats.is_clean() { "✓" } else { "⚠️ " };
    println!("{} {}", mark, stats.summary());
    for failure in stats.failures.iter().take(10) {
        println!("   ❌ line {}: {}", failure.line_number, failure.message);
    }
    if stats.failures.len() > 10 {
        println!("   … {} more failures", stats.failures.len() - 10);
    }
}

fn run_migrate(config: &Config, fresh: bool) -> Result<()> {
    println!("🚚 Migration - CSV exports → SQLite");
    println!("{}", RULE);

    let conn = open(config)?;
    let plan = config.migration_plan();
    let options = MigrationOptions {
        fresh,
        import: config.import_options(),
    };

    if fresh {
        println!("\n🗑️  Fresh run: existing rows will be deleted");
    }

    println!("\n💾 Importing from {}...", config.import.dir.display());
    let report = run_migration(&conn, &plan, &options)?;

    for stats in &report.entities {
        print_stats(stats);
    }
    for entity in &report.skipped_entities {
        println!("⚠️  {}: no file, skipped", entity.name());
    }

    println!("\n{}", RULE);
    if report.total_failed() == 0 {
        println!("🎉 Migration complete: {} rows imported", report.total_imported());
    } else {
        println!(
            "✅ Migration finished: {} rows imported, {} failed",
            report.total_imported(),
            report.total_failed()
        );
    }

    Ok(())
}

fn run_import_file(config: &Config, entity: &str, file: &std::path::Path) -> Result<()> {
    let entity = parse_entity(entity)?;

    println!("🗄️  Import {} - CSV → SQLite", entity.name());
    println!("{}", RULE);

    println!("\n📂 Loading CSV...");
    let table = CsvTable::from_path(file)?;
    println!("✓ Loaded {} rows ({} malformed)", table.len(), table.malformed.len());

    let conn = open(config)?;
    let options = config.import_options();

    println!("\n💾 Importing...");
    let mut importer = importer_for(entity, &options);
    let stats = run_import(&conn, importer.as_mut(), &table, &options)?;

    println!("\n{}", RULE);
    print_stats(&stats);

    Ok(())
}

fn run_reconcile(config: &Config, entity: &str, file: &std::path::Path) -> Result<()> {
    let entity = parse_entity(entity)?;

    println!("⚖️  Reconcile {} - CSV vs database", entity.name());
    println!("{}", RULE);

    let table = CsvTable::from_path(file)?;
    let conn = open(config)?;
    let report = ReconciliationEngine::new().reconcile(entity, &table, &conn)?;

    println!("\n{}", report.summary());
    for d in &report.discrepancies {
        println!("   ⚠️  {:?}: {}", d.category, d.description);
    }

    println!("\n{}", RULE);
    if report.is_balanced() {
        println!("✅ Balanced");
    } else {
        println!("❌ Discrepancy of {:.2}", report.result.difference());
    }

    Ok(())
}

fn run_repair(config: &Config, task: &RepairTask) -> Result<()> {
    println!("🔧 Repair");
    println!("{}", RULE);

    let conn = open(config)?;

    match task {
        RepairTask::BorrowerIds => {
            let changed = repair::regenerate_borrower_ids(&conn)?;
            println!("✓ {} borrower codes reassigned", changed);
        }
        RepairTask::BackfillDates { default_date } => {
            let summary = repair::backfill_missing_dates(&conn, default_date.unwrap_or_else(today))?;
            println!("✓ {} disbursement dates filled", summary.disbursement_dates);
            println!("✓ {} due dates filled", summary.due_dates);
            println!("✓ {} repayment dates filled", summary.payment_dates);
        }
        RepairTask::Balances => {
            let summary = repair::recompute_balances(&conn)?;
            println!("✓ {} loan balances corrected", summary.loans);
            println!("✓ {} savings balances corrected", summary.savings);
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct FullReport {
    as_of: NaiveDate,
    portfolio: PortfolioSummary,
    overdue: Vec<OverdueLoan>,
    monthly_collections: Vec<MonthlyCollection>,
    top_borrowers: Vec<BorrowerExposure>,
}

fn run_report(config: &Config, as_of: Option<NaiveDate>, json: bool) -> Result<()> {
    let conn = open_database(&config.database.path)?;
    let as_of = as_of.unwrap_or_else(today);

    let report = FullReport {
        as_of,
        portfolio: reports::portfolio_summary(&conn)?,
        overdue: reports::overdue_loans(&conn, as_of)?,
        monthly_collections: reports::monthly_collections(&conn)?,
        top_borrowers: reports::top_borrowers_by_outstanding(&conn, 10)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let p = &report.portfolio;
    println!("📊 Portfolio as of {}", as_of);
    println!("{}", RULE);
    println!("Borrowers:          {}", p.borrowers);
    println!("Loans:              {}", p.loans);
    for s in &p.loans_by_status {
        println!("  {:<16} {:>5}  {}", s.status.as_str(), s.count, format_ugx(s.outstanding));
    }
    println!("Disbursed:          {}", format_ugx(p.total_disbursed));
    println!("Total due:          {}", format_ugx(p.total_due));
    println!("Repaid:             {}", format_ugx(p.total_repaid));
    println!("Outstanding:        {}", format_ugx(p.total_outstanding));
    println!("Collection rate:    {:.1}%", p.collection_rate * 100.0);
    println!("Savings:            {}", format_ugx(p.savings_balance));
    println!("Expenses:           {}", format_ugx(p.total_expenses));

    println!("\n⏰ Overdue loans: {}", report.overdue.len());
    for l in &report.overdue {
        println!(
            "  {} {} ({}) - {} days, {}",
            l.loan_number,
            l.borrower_name,
            l.borrower_code,
            l.days_overdue,
            format_ugx(l.outstanding_balance)
        );
    }

    println!("\n💰 Collections by month");
    for m in &report.monthly_collections {
        println!("  {}  {:>5}  {}", m.month, m.repayments, format_ugx(m.amount));
    }

    println!("\n🏦 Largest exposures");
    for b in &report.top_borrowers {
        println!("  {:<8} {:<24} {}", b.borrower_code, b.borrower_name, format_ugx(b.outstanding));
    }

    Ok(())
}

fn run_score(amount: f64, purpose: &str, term: u32) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        bail!("amount must be a positive number, got {}", amount);
    }

    let request = CreditRequest::new(amount, purpose, term);
    let result = request.score();

    println!("📈 Credit score");
    println!("{}", RULE);
    println!("Amount:   {}", format_ugx(amount));
    println!("Purpose:  {}", if purpose.is_empty() { "-" } else { purpose });
    println!("Term:     {} months", term);
    println!("Base:     {}", request.base_score());
    println!("Score:    {} ({})", result.score, result.rating.as_str());

    Ok(())
}

fn run_notify(config: &Config, task: &NotifyTask) -> Result<()> {
    match task {
        NotifyTask::Overdue { as_of, channel } => {
            let name = channel.as_deref().unwrap_or(&config.notifications.channel);
            let channel = match Channel::parse(name) {
                Some(c) => c,
                None => bail!("unknown channel '{}' (expected whatsapp, sms or email)", name),
            };
            let as_of = as_of.unwrap_or_else(today);

            println!("📣 Overdue notices via {} as of {}", channel.as_str(), as_of);
            println!("{}", RULE);

            let conn = open(config)?;
            let summary = NotificationService::new(&conn, channel).notify_overdue(as_of)?;

            println!("\n✓ {} queued", summary.sent);
            println!("✓ {} failed", summary.failed);
            println!("✓ {} without a {} recipient", summary.no_recipient, channel.as_str());
        }
    }

    Ok(())
}
