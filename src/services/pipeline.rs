//! Page loop: fetch -> normalize -> resolve brokers -> persist, one page at a time.
//!
//! Failures are contained at the smallest unit that can absorb them. A rejected
//! record is skipped, a failed record write is counted and the page goes on.
//! Only a fetch that keeps failing or a lost storage connection ends the run early.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::client::{Page, RecordSource, SourceError};
use crate::config::Config;
use crate::db::error::StoreError;
use crate::models::search::RawRecord;
use crate::services::brokers::page_broker_names;
use crate::services::normalize::{NormalizedRecord, normalize_record};
use crate::services::store::{ListingStore, RecordOutcome, StepOutcome};

const MAX_JITTER_MILLIS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetching page {page} failed after {attempts} attempt(s): {source}")]
    Fetch { page: u32, attempts: u32, source: SourceError },
    #[error("storage unavailable: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source answered with an empty page.
    Exhausted,
    MaxPages,
    /// The last page the source said it has.
    LastReportedPage,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Exhausted => "source exhausted",
            StopReason::MaxPages => "page limit reached",
            StopReason::LastReportedPage => "last reported page reached",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages: u32,
    pub records_seen: usize,
    pub rejected: usize,
    pub inserted: usize,
    pub already_present: usize,
    pub record_failures: usize,
    pub addresses_written: usize,
    pub address_failures: usize,
    pub images_written: usize,
    pub image_failures: usize,
    pub stop_reason: Option<StopReason>,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub max_pages: NonZeroU32,
    pub page_delay: Duration,
    pub max_fetch_retries: NonZeroU32,
    pub fetch_backoff: Duration,
}

impl RunSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_pages: cfg.max_pages,
            page_delay: cfg.page_delay,
            max_fetch_retries: cfg.max_fetch_retries,
            fetch_backoff: cfg.fetch_backoff,
        }
    }
}

enum State {
    Fetch(u32),
    Process {
        page: u32,
        records: Vec<RawRecord>,
        total_pages: Option<u32>,
    },
    Done(StopReason),
}

pub struct Pipeline<'a, S, T> {
    source: &'a S,
    store: &'a T,
    settings: RunSettings,
}

impl<'a, S: RecordSource, T: ListingStore> Pipeline<'a, S, T> {
    pub fn new(source: &'a S, store: &'a T, settings: RunSettings) -> Self {
        Self {
            source,
            store,
            settings,
        }
    }

    pub fn run(&self) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();
        let mut state = State::Fetch(1);

        loop {
            state = match state {
                State::Fetch(page) => match self.fetch_with_retry(page)? {
                    Page::Exhausted => {
                        info!("Page {} returned no records", page);
                        State::Done(StopReason::Exhausted)
                    }
                    Page::Records { records, total_pages } => State::Process {
                        page,
                        records,
                        total_pages,
                    },
                },
                State::Process {
                    page,
                    records,
                    total_pages,
                } => {
                    self.process_page(page, &records, &mut summary)?;
                    summary.pages += 1;

                    if total_pages.is_some_and(|total| page >= total) {
                        State::Done(StopReason::LastReportedPage)
                    } else if page >= self.settings.max_pages.get() {
                        State::Done(StopReason::MaxPages)
                    } else {
                        if !self.settings.page_delay.is_zero() {
                            thread::sleep(self.settings.page_delay);
                        }
                        State::Fetch(page + 1)
                    }
                }
                State::Done(reason) => {
                    info!("Run finished after {} page(s): {}", summary.pages, reason);
                    summary.stop_reason = Some(reason);
                    return Ok(summary);
                }
            };
        }
    }

    fn fetch_with_retry(&self, page: u32) -> Result<Page, PipelineError> {
        let max_attempts = self.settings.max_fetch_retries.get();
        let mut attempt = 1;
        loop {
            match self.source.fetch(page) {
                Ok(result) => return Ok(result),
                Err(source) if !source.is_retryable() || attempt >= max_attempts => {
                    return Err(PipelineError::Fetch {
                        page,
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "Fetching page {} failed (attempt {}/{}): {}; retrying in {:?}",
                        page, attempt, max_attempts, e, delay
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.settings.fetch_backoff * attempt;
        if base.is_zero() {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=MAX_JITTER_MILLIS))
    }

    fn process_page(&self, page: u32, records: &[RawRecord], summary: &mut RunSummary) -> Result<(), PipelineError> {
        let accepted = records.iter().filter_map(normalize_record).collect::<Vec<_>>();
        let rejected = records.len() - accepted.len();
        summary.records_seen += records.len();
        summary.rejected += rejected;
        info!(
            "Page {}: {} record(s), {} accepted, {} rejected",
            page,
            records.len(),
            accepted.len(),
            rejected
        );

        let broker_ids = self.resolve_brokers(page, &accepted)?;

        for mut record in accepted {
            record.listing.broker_id = record
                .broker_name
                .as_deref()
                .and_then(|name| broker_ids.get(name).copied());

            match self.store.persist_record(&record) {
                Ok(RecordOutcome::Inserted { address, images }) => {
                    summary.inserted += 1;
                    tally(address, &mut summary.addresses_written, &mut summary.address_failures);
                    tally(images, &mut summary.images_written, &mut summary.image_failures);
                    debug!(
                        "Stored listing {} (address {:?}, images {:?})",
                        record.external_id(),
                        address,
                        images
                    );
                }
                Ok(RecordOutcome::AlreadyStored) => {
                    summary.already_present += 1;
                    debug!("Listing {} already stored; skipped", record.external_id());
                }
                Err(e) if e.is_connection_failure() => return Err(e.into()),
                Err(e) => {
                    summary.record_failures += 1;
                    error!("Storing listing {} failed: {}", record.external_id(), e);
                }
            }
        }
        Ok(())
    }

    /// Broker ids for the page. Without them listings are stored unlinked.
    fn resolve_brokers(&self, page: u32, records: &[NormalizedRecord]) -> Result<BTreeMap<String, Uuid>, PipelineError> {
        let names = page_broker_names(records);
        if names.is_empty() {
            return Ok(BTreeMap::new());
        }
        match self.store.resolve_brokers(&names) {
            Ok(ids) => Ok(ids),
            Err(e) if e.is_connection_failure() => Err(e.into()),
            Err(e) => {
                error!("Resolving {} broker(s) for page {} failed: {}", names.len(), page, e);
                Ok(BTreeMap::new())
            }
        }
    }
}

fn tally(step: StepOutcome, written: &mut usize, failed: &mut usize) {
    match step {
        StepOutcome::Written(n) => *written += n,
        StepOutcome::Failed => *failed += 1,
        StepOutcome::Skipped => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::normalize::is_synthetic_id;
    use crate::services::store::memory::{Counts, MemoryStore};
    use serde_json::{Value, json};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// Replays a fixed sequence of fetch results; reports end of data once drained.
    struct ScriptedSource {
        script: RefCell<VecDeque<Result<Page, SourceError>>>,
        calls: Cell<u32>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Page, SourceError>>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                calls: Cell::new(0),
            }
        }
    }

    impl RecordSource for ScriptedSource {
        fn fetch(&self, _page: u32) -> Result<Page, SourceError> {
            self.calls.set(self.calls.get() + 1);
            self.script.borrow_mut().pop_front().unwrap_or(Ok(Page::Exhausted))
        }
    }

    fn settings() -> RunSettings {
        RunSettings {
            max_pages: NonZeroU32::new(20).unwrap(),
            page_delay: Duration::ZERO,
            max_fetch_retries: NonZeroU32::new(3).unwrap(),
            fetch_backoff: Duration::ZERO,
        }
    }

    fn records(records: Vec<Value>) -> Result<Page, SourceError> {
        Ok(Page::Records {
            records,
            total_pages: None,
        })
    }

    fn fixture_records() -> Vec<Value> {
        let json = std::fs::read_to_string("tests/data/search-page.json").expect("fixture present");
        let page: Value = serde_json::from_str(&json).expect("parse fixture");
        page["cat1"]["searchResults"]["listResults"]
            .as_array()
            .cloned()
            .expect("fixture has list results")
    }

    fn run(store: &MemoryStore, script: Vec<Result<Page, SourceError>>) -> Result<RunSummary, PipelineError> {
        let source = ScriptedSource::new(script);
        Pipeline::new(&source, store, settings()).run()
    }

    fn transport_error() -> Result<Page, SourceError> {
        Err(SourceError::Transport("connection reset".into()))
    }

    #[test]
    fn fixture_page_is_stored_end_to_end() {
        let store = MemoryStore::new();
        let summary = run(&store, vec![records(fixture_records())]).unwrap();

        assert_eq!(summary.pages, 1);
        assert_eq!(summary.records_seen, 5);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.inserted, 4);
        assert_eq!(summary.addresses_written, 2);
        assert_eq!(summary.images_written, 3);
        assert_eq!(summary.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(
            store.counts(),
            Counts {
                listings: 4,
                brokers: 2,
                addresses: 2,
                images: 3
            }
        );
        assert!(store.is_consistent());

        let listing = store.listing_by_external_id("123").unwrap();
        assert_eq!(listing.price, 450000.0);
        assert_eq!(listing.status, "FOR_SALE");
        assert_eq!((listing.bedrooms, listing.bathrooms), (3, 2));
        assert_eq!(listing.broker_id, store.broker_id("Acme Realty"));
        let address = &store.addresses_for(listing.id)[0];
        assert_eq!(address.zipcode, "90210");
        assert_eq!(address.city.as_deref(), Some("Beverly Hills"));
        let images = store.images_for(listing.id);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].url, "http://x/1.jpg");
    }

    #[test]
    fn single_record_scenario() {
        let raw = json!({
            "id": "123",
            "unformattedPrice": "$450,000",
            "hdpData": {"homeInfo": {"homeType": "SINGLE_FAMILY", "livingArea": 1500, "zipcode": "90210"}},
            "brokerName": "Acme Realty",
            "carouselPhotos": [{"url": "http://x/1.jpg"}]
        });
        let store = MemoryStore::new();
        run(&store, vec![records(vec![raw])]).unwrap();

        let listing = store.listing_by_external_id("123").unwrap();
        assert_eq!(listing.price, 450000.0);
        assert_eq!(listing.home_type.as_deref(), Some("SINGLE_FAMILY"));
        assert_eq!(listing.area, Some(1500.0));
        assert!(listing.broker_id.is_some());
        assert_eq!(listing.broker_id, store.broker_id("Acme Realty"));

        let addresses = store.addresses_for(listing.id);
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].zipcode, "90210");
        let images = store.images_for(listing.id);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].url, "http://x/1.jpg");
    }

    #[test]
    fn one_unparsable_price_skips_only_that_record() {
        let mut page = (1..=5)
            .map(|i| json!({"id": format!("n{}", i), "unformattedPrice": format!("${}00,000", i)}))
            .collect::<Vec<_>>();
        page[2]["unformattedPrice"] = json!("Call for price");

        let store = MemoryStore::new();
        let summary = run(&store, vec![records(page)]).unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.inserted, 4);
        assert_eq!(store.counts().listings, 4);
        assert!(store.listing_by_external_id("n3").is_none());
        assert!(store.listing_by_external_id("n5").is_some());
    }

    #[test]
    fn rejected_records_leave_no_trace() {
        let store = MemoryStore::new();
        run(&store, vec![records(fixture_records())]).unwrap();

        assert!(store.listing_by_external_id("789").is_none());
        assert!(store.broker_id("Ghost Brokers").is_none());
    }

    #[test]
    fn nested_zipcode_is_used_when_top_level_is_missing() {
        let store = MemoryStore::new();
        run(&store, vec![records(fixture_records())]).unwrap();

        let listing = store.listing_by_external_id("456").unwrap();
        assert_eq!(listing.bedrooms, 4);
        assert_eq!(store.addresses_for(listing.id)[0].zipcode, "94110");

        let no_zip = store.listing_by_external_id("1001").unwrap();
        assert!(store.addresses_for(no_zip.id).is_empty());
        assert_eq!(no_zip.price, 0.0);
        assert_eq!(no_zip.broker_id, store.broker_id("Bay Homes"));
    }

    #[test]
    fn re_ingesting_the_same_page_changes_nothing() {
        let page = vec![
            json!({"id": "a1", "unformattedPrice": "$100", "brokerName": "Acme Realty", "zipcode": "11111",
                   "carouselPhotos": [{"url": "http://x/a1.jpg"}]}),
            json!({"id": "a2", "unformattedPrice": 200, "brokerName": "Bay Homes"}),
        ];
        let store = MemoryStore::new();

        run(&store, vec![records(page.clone())]).unwrap();
        let before = store.counts();
        let first_id = store.listing_by_external_id("a1").unwrap().id;

        let summary = run(&store, vec![records(page)]).unwrap();
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.already_present, 2);
        assert_eq!(store.counts(), before);
        assert_eq!(store.listing_by_external_id("a1").unwrap().id, first_id);
    }

    #[test]
    fn brokers_keep_their_ids_across_pages() {
        let store = MemoryStore::new();
        run(
            &store,
            vec![
                records(vec![json!({"id": "p1", "brokerName": "Acme Realty"})]),
                records(vec![json!({"id": "p2", "brokerName": " Acme Realty"})]),
            ],
        )
        .unwrap();

        let first = store.listing_by_external_id("p1").unwrap();
        let second = store.listing_by_external_id("p2").unwrap();
        assert!(first.broker_id.is_some());
        assert_eq!(first.broker_id, second.broker_id);
        assert_eq!(store.counts().brokers, 1);
    }

    #[test]
    fn one_failing_listing_does_not_stop_the_page() {
        let store = MemoryStore::new().fail_listing("f2");
        let page = (1..=4)
            .map(|i| json!({"id": format!("f{}", i), "zipcode": "22222"}))
            .collect::<Vec<_>>();

        let summary = run(&store, vec![records(page)]).unwrap();
        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.record_failures, 1);
        assert_eq!(store.counts().listings, 3);
        assert_eq!(store.counts().addresses, 3);
        assert!(store.listing_by_external_id("f2").is_none());
        assert!(store.is_consistent());
    }

    #[test]
    fn failing_images_keep_listing_and_address() {
        let store = MemoryStore::new().fail_images("i1");
        let page = vec![json!({"id": "i1", "zipcode": "33333", "carouselPhotos": [{"url": "http://x/i1.jpg"}]})];

        let summary = run(&store, vec![records(page)]).unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.image_failures, 1);
        assert_eq!(summary.addresses_written, 1);
        let listing = store.listing_by_external_id("i1").unwrap();
        assert_eq!(store.addresses_for(listing.id).len(), 1);
        assert!(store.images_for(listing.id).is_empty());
    }

    #[test]
    fn transient_fetch_failures_are_retried() {
        let store = MemoryStore::new();
        let source = ScriptedSource::new(vec![
            transport_error(),
            transport_error(),
            records(vec![json!({"id": "r1"})]),
        ]);
        let summary = Pipeline::new(&source, &store, settings()).run().unwrap();

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.stop_reason, Some(StopReason::Exhausted));
        // three attempts for page 1, one for the empty page 2
        assert_eq!(source.calls.get(), 4);
    }

    #[test]
    fn exhausted_retries_stop_the_run_with_an_error() {
        let store = MemoryStore::new();
        let source = ScriptedSource::new(vec![
            records(vec![json!({"id": "e1"})]),
            transport_error(),
            transport_error(),
            transport_error(),
            records(vec![json!({"id": "never"})]),
        ]);

        match Pipeline::new(&source, &store, settings()).run() {
            Err(PipelineError::Fetch { page, attempts, .. }) => {
                assert_eq!(page, 2);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(store.counts().listings, 1);
        assert!(store.listing_by_external_id("never").is_none());
    }

    #[test]
    fn payload_errors_are_not_retried() {
        let store = MemoryStore::new();
        let source = ScriptedSource::new(vec![Err(SourceError::Payload("bad template".into()))]);

        let err = Pipeline::new(&source, &store, settings()).run().unwrap_err();
        assert!(matches!(err, PipelineError::Fetch { attempts: 1, .. }));
        assert_eq!(source.calls.get(), 1);
    }

    #[test]
    fn stops_at_the_reported_last_page() {
        let store = MemoryStore::new();
        let page = |id: &str| {
            Ok(Page::Records {
                records: vec![json!({ "id": id })],
                total_pages: Some(2),
            })
        };
        let source = ScriptedSource::new(vec![page("t1"), page("t2"), page("t3")]);

        let summary = Pipeline::new(&source, &store, settings()).run().unwrap();
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.stop_reason, Some(StopReason::LastReportedPage));
        assert_eq!(source.calls.get(), 2);
    }

    #[test]
    fn stops_at_the_page_limit() {
        let store = MemoryStore::new();
        let source = ScriptedSource::new((1..=5).map(|i| records(vec![json!({ "id": format!("m{}", i) })])).collect());
        let limited = RunSettings {
            max_pages: NonZeroU32::new(3).unwrap(),
            ..settings()
        };

        let summary = Pipeline::new(&source, &store, limited).run().unwrap();
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.stop_reason, Some(StopReason::MaxPages));
        assert_eq!(store.counts().listings, 3);
    }

    #[test]
    fn lost_storage_connection_stops_the_run() {
        let store = MemoryStore::new();
        store.go_offline();

        let err = run(&store, vec![records(vec![json!({"id": "o1", "brokerName": "Acme Realty"})])]).unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
        assert_eq!(store.counts().listings, 0);
    }

    #[test]
    fn records_without_ids_get_synthetic_ones() {
        let store = MemoryStore::new();
        let summary = run(&store, vec![records(vec![json!({"unformattedPrice": "$2,300/mo"})])]).unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(store.counts().listings, 1);
        assert!(
            fixture_records()
                .iter()
                .filter_map(normalize_record)
                .any(|r| is_synthetic_id(r.external_id()))
        );
    }

    #[test]
    fn backoff_grows_with_attempts_and_stays_within_jitter() {
        let store = MemoryStore::new();
        let source = ScriptedSource::new(Vec::new());
        let slow = RunSettings {
            fetch_backoff: Duration::from_secs(2),
            ..settings()
        };

        let second = Pipeline::new(&source, &store, slow).backoff(2);
        assert!(second >= Duration::from_secs(4));
        assert!(second <= Duration::from_millis(5_000));
        assert_eq!(Pipeline::new(&source, &store, settings()).backoff(3), Duration::ZERO);
    }
}
