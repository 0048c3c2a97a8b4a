use anyhow::{bail, Context, Result};
use chrono::Duration;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use recurrence_engine::{
    compiler, desired_ranges, temporal, EngineOptions, RecurrenceRule, Timing, WeekStartDay,
};

#[derive(Parser)]
#[command(name = "recur", version, about = "Inspect and expand recurrence rules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Expand a rule from a first occurrence into JSON timing ranges
    Expand(ExpandArgs),
    /// Parse a rule string into structured fields (JSON)
    Parse(RuleArgs),
    /// Parse a rule string and print its normalized form
    Normalize(RuleArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum WeekStart {
    Monday,
    Sunday,
    Saturday,
}

impl From<WeekStart> for WeekStartDay {
    fn from(value: WeekStart) -> Self {
        match value {
            WeekStart::Monday => WeekStartDay::Monday,
            WeekStart::Sunday => WeekStartDay::Sunday,
            WeekStart::Saturday => WeekStartDay::Saturday,
        }
    }
}

#[derive(Args)]
struct ExpandArgs {
    /// RRULE text, e.g. "FREQ=WEEKLY;BYDAY=TU,TH;COUNT=10"
    #[arg(long)]
    rule: String,

    /// First occurrence start (RFC 3339)
    #[arg(long, requires = "stop", conflicts_with = "date")]
    start: Option<String>,

    /// First occurrence end (RFC 3339)
    #[arg(long, requires = "start")]
    stop: Option<String>,

    /// First occurrence of an all-day event (YYYY-MM-DD)
    #[arg(long)]
    date: Option<String>,

    /// Length of an all-day event in days
    #[arg(long, default_value_t = 1, requires = "date")]
    days: i64,

    /// IANA timezone the wall-clock time is kept in
    #[arg(long, default_value = "UTC")]
    timezone: String,

    #[arg(long, value_enum, default_value_t = WeekStart::Monday)]
    week_start: WeekStart,
}

#[derive(Args)]
struct RuleArgs {
    /// RRULE text
    #[arg(long)]
    rule: String,

    /// Date of the first occurrence (YYYY-MM-DD), used for missing selectors
    #[arg(long)]
    anchor: String,

    #[arg(long, value_enum, default_value_t = WeekStart::Monday)]
    week_start: WeekStart,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Expand(args) => expand(args),
        Command::Parse(args) => {
            let rule = parse_rule(&args)?;
            println!("{}", serde_json::to_string_pretty(&rule)?);
            Ok(())
        }
        Command::Normalize(args) => {
            let rule = parse_rule(&args)?;
            println!("{}", compiler::serialize(&rule)?);
            Ok(())
        }
    }
}

fn parse_rule(args: &RuleArgs) -> Result<RecurrenceRule> {
    let options = EngineOptions::default().with_week_start(args.week_start.into());
    let anchor = temporal::parse_date(&args.anchor)?;
    Ok(compiler::parse(&args.rule, anchor, options.week_start)?)
}

fn expand(args: ExpandArgs) -> Result<()> {
    let options = EngineOptions::default()
        .with_timezone(temporal::parse_timezone(&args.timezone)?)
        .with_week_start(args.week_start.into());
    let tz = options.timezone;

    let base = match (&args.start, &args.stop, &args.date) {
        (Some(start), Some(stop), None) => {
            let start = temporal::parse_rfc3339(start)?;
            let stop = temporal::parse_rfc3339(stop)?;
            if stop < start {
                bail!("--stop is before --start");
            }
            Timing::timed(start, stop)
        }
        (None, None, Some(date)) => {
            if args.days < 1 {
                bail!("--days must be at least 1");
            }
            let start = temporal::parse_date(date)?;
            Timing::all_day(start, start + Duration::days(args.days))
        }
        _ => bail!("pass either --start and --stop, or --date"),
    };

    let rule = compiler::parse(&args.rule, base.local_date(&tz), options.week_start)
        .with_context(|| format!("cannot use rule '{}'", args.rule))?;
    let ranges: Vec<Timing> = desired_ranges(&rule, &base, tz)?.into_iter().collect();
    tracing::info!(count = ranges.len(), "expanded");

    println!("{}", serde_json::to_string_pretty(&ranges)?);
    Ok(())
}
