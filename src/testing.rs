//! Fixtures and call-counting fakes of the external collaborators.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

use crate::{
    dto::{Address, Fix, VendorPosition},
    export::ExportBundle,
    geocoder::{GeocodeError, Geocoder},
    telegram::{NotifySink, SinkError},
    telematics::{TelematicsError, TelematicsSource},
};

pub fn fix_at(latitude: f64, longitude: f64, timestamp: &str) -> Fix {
    vendor_at(latitude, longitude, timestamp).into_fix(Address::default())
}

pub fn vendor_at(latitude: f64, longitude: f64, timestamp: &str) -> VendorPosition {
    serde_json::from_value(serde_json::json!({
        "timestamp": timestamp,
        "lat": latitude,
        "lon": longitude,
        "speed": 30.0,
        "mileage": 1000.0,
        "description": "GPS",
        "battExtVolts": 12.5,
        "fix": 1,
        "hdop": 1.1
    }))
    .unwrap()
}

pub fn milano() -> Address {
    Address {
        street: "Via Roma".into(),
        locality: "Milano".into(),
        region: "Lombardia".into(),
    }
}

#[derive(Clone)]
pub enum SourceReply {
    Positions(Vec<VendorPosition>),
    Unauthorized,
    Offline,
}

pub struct MockSource {
    reply: Mutex<SourceReply>,
    calls: AtomicUsize,
}

impl MockSource {
    pub fn new(reply: SourceReply) -> Self {
        MockSource {
            reply: Mutex::new(reply),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, reply: SourceReply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TelematicsSource for MockSource {
    async fn fetch_recent(&self) -> Result<Vec<VendorPosition>, TelematicsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply.lock().unwrap().clone() {
            SourceReply::Positions(positions) => Ok(positions),
            SourceReply::Unauthorized => Err(TelematicsError::Unauthorized),
            SourceReply::Offline => Err(TelematicsError::Http("connection refused".into())),
        }
    }
}

pub struct MockGeocoder {
    answer: Option<Address>,
    calls: AtomicUsize,
}

impl MockGeocoder {
    pub fn answering(address: Address) -> Self {
        MockGeocoder {
            answer: Some(address),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        MockGeocoder {
            answer: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Geocoder for MockGeocoder {
    async fn reverse_geocode(&self, _: f64, _: f64) -> Result<Option<Address>, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            Some(address) => Ok(Some(address.clone())),
            None => Err(GeocodeError::Timeout),
        }
    }
}

#[derive(Default)]
pub struct MockSink {
    failing: AtomicBool,
    calls: AtomicUsize,
    delivered: Mutex<Vec<String>>,
}

impl MockSink {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Content hashes of the bundles delivered successfully.
    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

impl NotifySink for MockSink {
    async fn send_bulk_export(&self, bundle: &ExportBundle) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Http("chat unreachable".into()));
        }
        self.delivered.lock().unwrap().push(bundle.content_hash());
        Ok(())
    }
}
