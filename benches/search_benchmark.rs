use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{seq::SliceRandom, thread_rng, Rng};
use sky_odyssey::ranker::{dedup_trips, sort_trips};
use sky_odyssey::{CacheConfig, Leg, QueryKey, Quote, QuoteCache, SearchOptions, SortKey, TripOption, TtlQuoteCache};
use std::sync::Arc;
use std::thread;

const DESTINATIONS: &[&str] = &["BCN", "FCO", "AMS", "BER", "MAD", "LIS", "VIE", "PRG", "BUD", "ATH"];

fn quote(destination: &str, date: NaiveDate, price: f64) -> Quote {
    Quote {
        origin: "LYS".to_string(),
        destination: destination.to_string(),
        date,
        display_price: format!("€{price}"),
        numeric_price: price,
        stops: 0,
        carrier: Some("Vueling".to_string()),
        departure: Some("7:05 AM".to_string()),
        arrival: Some("8:20 AM".to_string()),
        duration: Some("1 hr 15 min".to_string()),
        booking_link: None,
        from_cache: false,
    }
}

// Mixed concurrent reads and writes against the in-memory quote cache
pub fn cache_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("quote_cache");
    let start = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
    let dates: Vec<NaiveDate> = (0..30).map(|d| start + chrono::Duration::days(d)).collect();

    for threads in [1usize, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(threads), threads, |b, &threads| {
            b.iter(|| {
                let cache = Arc::new(TtlQuoteCache::new(&CacheConfig::default()));
                let mut handles = vec![];
                for _ in 0..threads {
                    let cache = Arc::clone(&cache);
                    let dates = dates.clone();
                    handles.push(thread::spawn(move || {
                        let mut rng = thread_rng();
                        let options = SearchOptions::default();
                        for _ in 0..250 {
                            let destination = DESTINATIONS.choose(&mut rng).unwrap();
                            let date = *dates.choose(&mut rng).unwrap();
                            let key = QueryKey::new("LYS", destination, date, &options);
                            if rng.gen_bool(0.3) {
                                cache.put(&key, &quote(destination, date, rng.gen_range(20.0..400.0)));
                            } else {
                                let _ = cache.get(&key);
                            }
                        }
                    }));
                }
                for handle in handles {
                    handle.join().unwrap();
                }
                black_box(cache.stats())
            });
        });
    }

    group.finish();
}

// Cross product ranking as done by round-trip searches
pub fn ranking_benchmark(c: &mut Criterion) {
    let date = NaiveDate::from_ymd_opt(2026, 4, 19).unwrap();
    let mut rng = thread_rng();
    let legs: Vec<Leg> = (0..40)
        .map(|i| {
            let mut q = quote(DESTINATIONS[i % DESTINATIONS.len()], date, rng.gen_range(20.0..400.0));
            q.departure = Some(format!("{}:{:02} AM", 1 + i % 11, i % 60));
            Leg::from(&q)
        })
        .collect();
    let trips: Vec<TripOption> = legs
        .iter()
        .flat_map(|out| legs.iter().map(move |back| TripOption::new(vec![out.clone(), back.clone()])))
        .collect();

    let mut group = c.benchmark_group("trip_ranking");
    for key in [SortKey::Price, SortKey::Duration, SortKey::Departure] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{key:?}")), &key, |b, &key| {
            b.iter(|| {
                let mut ranked = dedup_trips(trips.clone());
                sort_trips(&mut ranked, key);
                black_box(ranked.len())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, cache_benchmark, ranking_benchmark);
criterion_main!(benches);
