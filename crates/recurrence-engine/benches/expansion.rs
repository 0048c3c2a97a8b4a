use std::hint::black_box;

use chrono::{NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Europe::Brussels;
use criterion::{criterion_group, criterion_main, Criterion};

use recurrence_engine::generator::{occurrences, Anchor};
use recurrence_engine::rule::{MonthBy, MonthOrdinal, Pattern, RecurrenceRule, Termination};
use recurrence_engine::{compiler, desired_ranges, Timing, WeekStartDay};

fn weekly_rule() -> RecurrenceRule {
    RecurrenceRule::new(Pattern::Weekly {
        weekdays: [Weekday::Mon, Weekday::Wed, Weekday::Fri]
            .into_iter()
            .collect(),
    })
}

fn bench_expand_forever(c: &mut Criterion) {
    let rule = weekly_rule();
    let start = Brussels
        .with_ymd_and_hms(2026, 3, 4, 9, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    let anchor = Anchor::Timed {
        start,
        timezone: Brussels,
    };
    c.bench_function("expand_weekly_forever_capped", |b| {
        b.iter(|| occurrences(black_box(&rule), black_box(&anchor)).unwrap())
    });
}

fn bench_desired_ranges_count(c: &mut Criterion) {
    let rule = RecurrenceRule::new(Pattern::Monthly {
        by: MonthBy::ByWeekday {
            ordinal: MonthOrdinal::Last,
            weekday: Weekday::Thu,
        },
    })
    .with_termination(Termination::Count(120));
    let date = NaiveDate::from_ymd_opt(2026, 3, 26).unwrap();
    let base = Timing::all_day(date, date.succ_opt().unwrap());
    c.bench_function("desired_ranges_monthly_count_120", |b| {
        b.iter(|| desired_ranges(black_box(&rule), black_box(&base), chrono_tz::UTC).unwrap())
    });
}

fn bench_rule_string_roundtrip(c: &mut Criterion) {
    let rule = weekly_rule().with_termination(Termination::Count(52));
    let anchor = NaiveDate::from_ymd_opt(2026, 3, 4).unwrap();
    c.bench_function("rule_string_roundtrip", |b| {
        b.iter(|| {
            let text = compiler::serialize(black_box(&rule)).unwrap();
            compiler::parse(&text, anchor, WeekStartDay::Monday).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_expand_forever,
    bench_desired_ranges_count,
    bench_rule_string_roundtrip
);
criterion_main!(benches);
