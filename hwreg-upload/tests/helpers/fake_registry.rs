//! In-memory device registry
//!
//! Holds a list of registered serials and counts every call so tests can
//! assert what the engine did remotely. Failures are injected per operation.

use async_trait::async_trait;
use hwreg_upload::models::{serials_match, IdentityRecord};
use hwreg_upload::services::{
    DevicePage, DeviceRegistry, ImportStatus, ImportTicket, RegisteredDevice, RegistryError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct FakeRegistry {
    registered: Mutex<Vec<String>>,
    submitted: Mutex<Vec<String>>,
    create_errors: Mutex<HashMap<String, RegistryError>>,
    status_script: Mutex<VecDeque<Result<ImportStatus, RegistryError>>>,
    default_status: Mutex<Result<ImportStatus, RegistryError>>,
    /// Created devices show up in lookups right away
    register_on_create: AtomicBool,
    /// Serial that appears once the lookup count passes a threshold
    register_after_finds: Mutex<Option<(usize, String)>>,
    find_fails: AtomicBool,
    list_fails: AtomicBool,
    pub find_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
}

pub fn server_error(message: &str) -> RegistryError {
    RegistryError::Api {
        status: 500,
        code: Some("InternalServerError".to_string()),
        message: message.to_string(),
    }
}

pub fn status(value: &str) -> ImportStatus {
    ImportStatus {
        status: value.to_string(),
        error_name: None,
        error_code: None,
    }
}

impl FakeRegistry {
    /// Empty registry whose imports report "pending" forever
    pub fn new() -> Self {
        Self {
            registered: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            create_errors: Mutex::new(HashMap::new()),
            status_script: Mutex::new(VecDeque::new()),
            default_status: Mutex::new(Ok(status("pending"))),
            register_on_create: AtomicBool::new(false),
            register_after_finds: Mutex::new(None),
            find_fails: AtomicBool::new(false),
            list_fails: AtomicBool::new(false),
            find_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_registered(serials: &[&str]) -> Self {
        let registry = Self::new();
        for serial in serials {
            registry.register(serial);
        }
        registry
    }

    pub fn register(&self, serial: &str) {
        self.registered.lock().unwrap().push(serial.to_string());
    }

    pub fn fail_create(&self, serial: &str, error: RegistryError) {
        self.create_errors
            .lock()
            .unwrap()
            .insert(serial.to_lowercase(), error);
    }

    pub fn clear_create_error(&self, serial: &str) {
        self.create_errors.lock().unwrap().remove(&serial.to_lowercase());
    }

    /// Status readings returned in order before the default applies
    pub fn script_status(&self, readings: Vec<Result<ImportStatus, RegistryError>>) {
        self.status_script.lock().unwrap().extend(readings);
    }

    pub fn set_default_status(&self, reading: Result<ImportStatus, RegistryError>) {
        *self.default_status.lock().unwrap() = reading;
    }

    pub fn set_register_on_create(&self, value: bool) {
        self.register_on_create.store(value, Ordering::SeqCst);
    }

    /// Register `serial` right before lookup number `finds + 1` is answered
    pub fn register_after_finds(&self, finds: usize, serial: &str) {
        *self.register_after_finds.lock().unwrap() = Some((finds, serial.to_string()));
    }

    pub fn set_find_fails(&self, value: bool) {
        self.find_fails.store(value, Ordering::SeqCst);
    }

    pub fn set_list_fails(&self, value: bool) {
        self.list_fails.store(value, Ordering::SeqCst);
    }

    /// Serials passed to create_record, in order
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_checks(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn finds(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn is_registered(&self, serial: &str) -> bool {
        self.registered
            .lock()
            .unwrap()
            .iter()
            .any(|s| serials_match(s, serial))
    }
}

#[async_trait]
impl DeviceRegistry for FakeRegistry {
    async fn find_by_serial(&self, serial: &str) -> Result<Vec<RegisteredDevice>, RegistryError> {
        let n = self.find_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let due = {
            let mut pending = self.register_after_finds.lock().unwrap();
            match pending.as_ref() {
                Some((after, _)) if n > *after => pending.take().map(|(_, s)| s),
                _ => None,
            }
        };
        if let Some(late) = due {
            self.register(&late);
        }

        if self.find_fails.load(Ordering::SeqCst) {
            return Err(server_error("filter not supported"));
        }

        if self.is_registered(serial) {
            Ok(vec![RegisteredDevice {
                id: format!("device-{}", serial),
                serial_number: serial.to_string(),
            }])
        } else {
            Ok(Vec::new())
        }
    }

    async fn list_page(
        &self,
        page_size: usize,
        next_link: Option<&str>,
    ) -> Result<DevicePage, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(RegistryError::Network("connection reset".to_string()));
        }

        let offset: usize = next_link.and_then(|l| l.parse().ok()).unwrap_or(0);
        let registered = self.registered.lock().unwrap().clone();
        let end = (offset + page_size).min(registered.len());

        Ok(DevicePage {
            devices: registered[offset.min(end)..end]
                .iter()
                .map(|s| RegisteredDevice {
                    id: format!("device-{}", s),
                    serial_number: s.clone(),
                })
                .collect(),
            next_link: (end < registered.len()).then(|| end.to_string()),
        })
    }

    async fn create_record(&self, record: &IdentityRecord) -> Result<ImportTicket, RegistryError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let serial = record.serial_number().to_string();
        self.submitted.lock().unwrap().push(serial.clone());

        if let Some(error) = self.create_errors.lock().unwrap().get(&serial.to_lowercase()) {
            return Err(error.clone());
        }

        if self.register_on_create.load(Ordering::SeqCst) {
            self.register(&serial);
        }

        Ok(ImportTicket {
            import_id: Some(format!("import-{}", n)),
        })
    }

    async fn get_import_status(&self, _import_id: &str) -> Result<ImportStatus, RegistryError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reading) = self.status_script.lock().unwrap().pop_front() {
            return reading;
        }
        self.default_status.lock().unwrap().clone()
    }
}
