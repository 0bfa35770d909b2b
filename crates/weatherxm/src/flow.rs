//! Operator-facing setup and options flows.
//!
//! A flow validates what the operator typed and either hands back a form to
//! show again (with per-field errors) or the finished value. Flows never
//! touch the store themselves; the caller persists what they produce.

use std::collections::BTreeMap;
use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use tracing::info;
use tracing::warn;

use crate::entry::ConfigRecord;
use crate::entry::EntryOptions;
use crate::entry::IntervalUnit;
use crate::entry::PollingInterval;
use crate::entry::normalize_device_id;
use crate::provider::DeviceReference;
use crate::provider::FetchError;
use crate::provider::WeatherClient;

/// Key for errors that apply to the whole form rather than one field
pub const BASE: &str = "base";

pub const FIELD_DEVICE_ID: &str = "device_id";
pub const FIELD_CELL_INDEX: &str = "cell_index";
pub const FIELD_POLLING_INTERVAL_VALUE: &str = "polling_interval_value";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FormError {
    Required,
    DeviceExists,
    CannotConnect,
    CannotFetchDeviceName,
    InvalidInterval,
}

impl From<&FetchError> for FormError {
    fn from(err: &FetchError) -> Self {
        if err.is_connectivity() {
            Self::CannotConnect
        } else {
            Self::CannotFetchDeviceName
        }
    }
}

/// Field name (or [`BASE`]) to error
pub type FormErrors = BTreeMap<&'static str, FormError>;

/// Outcome of one flow step.
#[derive(Debug, PartialEq)]
pub enum FlowResult<T> {
    /// Show the form for `step_id` again, annotated with `errors`
    ShowForm {
        step_id: &'static str,
        errors: FormErrors,
    },
    CreateEntry(T),
}

impl<T> FlowResult<T> {
    fn form(step_id: &'static str, errors: FormErrors) -> Self {
        Self::ShowForm { step_id, errors }
    }

    fn form_error(step_id: &'static str, field: &'static str, error: FormError) -> Self {
        Self::form(step_id, FormErrors::from([(field, error)]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SetupState {
    CollectingInput,
    Validating,
    Done,
    /// Last submission was rejected; the form is shown again and accepts
    /// another submission
    Error,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupInput {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub cell_index: String,
}

/// Setup wizard for adding a station.
pub struct SetupFlow<'a> {
    client: &'a dyn WeatherClient,
    /// Normalized ids of stations that are already configured
    configured: HashSet<String>,
    state: SetupState,
}

impl<'a> SetupFlow<'a> {
    pub const STEP_ID: &'static str = "user";

    pub fn new(client: &'a dyn WeatherClient, configured: HashSet<String>) -> Self {
        Self {
            client,
            configured,
            state: SetupState::CollectingInput,
        }
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    /// The empty form
    pub fn start(&mut self) -> FlowResult<ConfigRecord> {
        self.state = SetupState::CollectingInput;
        FlowResult::form(Self::STEP_ID, FormErrors::new())
    }

    pub async fn submit(&mut self, input: SetupInput) -> FlowResult<ConfigRecord> {
        let device_id = input.device_id.trim();
        let cell_index = input.cell_index.trim();

        let mut errors = FormErrors::new();
        if device_id.is_empty() {
            errors.insert(FIELD_DEVICE_ID, FormError::Required);
        }
        if cell_index.is_empty() {
            errors.insert(FIELD_CELL_INDEX, FormError::Required);
        }
        if !errors.is_empty() {
            self.state = SetupState::CollectingInput;
            return FlowResult::form(Self::STEP_ID, errors);
        }

        self.state = SetupState::Validating;

        let entry_id = normalize_device_id(device_id);
        if entry_id.is_empty() {
            self.state = SetupState::Error;
            return FlowResult::form_error(Self::STEP_ID, FIELD_DEVICE_ID, FormError::Required);
        }
        if self.configured.contains(&entry_id) {
            warn!("Device {} is already configured", entry_id);
            self.state = SetupState::Error;
            return FlowResult::form_error(Self::STEP_ID, BASE, FormError::DeviceExists);
        }

        let device = DeviceReference::new(cell_index, device_id);
        let report = match self.client.fetch(&device).await {
            Ok(report) => report,
            Err(e) => {
                let error = FormError::from(&e);
                warn!("Setup of {} failed ({}): {}", device, error, e);
                self.state = SetupState::Error;
                return FlowResult::form_error(Self::STEP_ID, BASE, error);
            }
        };

        let display_name = report
            .name
            .unwrap_or_else(|| format!("WeatherXM {}", device_id));
        let record = ConfigRecord::new(device, display_name);
        info!(
            "Setup complete for {} as {} ({})",
            record.device, record.entry_id, record.display_name
        );

        self.configured.insert(record.entry_id.clone());
        self.state = SetupState::Done;
        FlowResult::CreateEntry(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct OptionsInput {
    pub polling_interval_value: i64,
    pub polling_interval_unit: IntervalUnit,
}

/// Single-step options flow for an existing record.
///
/// Only the polling interval is editable; the device is never re-validated.
pub struct OptionsFlow {
    current: EntryOptions,
}

impl OptionsFlow {
    pub const STEP_ID: &'static str = "init";

    pub fn new(current: EntryOptions) -> Self {
        Self { current }
    }

    /// Form prefilled with the record's current options
    pub fn defaults(&self) -> OptionsInput {
        let interval = self.current.polling_interval;
        OptionsInput {
            polling_interval_value: i64::try_from(interval.value).unwrap_or(i64::MAX),
            polling_interval_unit: interval.unit,
        }
    }

    pub fn submit(&self, input: OptionsInput) -> FlowResult<EntryOptions> {
        let value = match u64::try_from(input.polling_interval_value) {
            Ok(value) if value > 0 => value,
            _ => {
                return FlowResult::form_error(
                    Self::STEP_ID,
                    FIELD_POLLING_INTERVAL_VALUE,
                    FormError::InvalidInterval,
                );
            }
        };

        FlowResult::CreateEntry(EntryOptions {
            polling_interval: PollingInterval {
                value,
                unit: input.polling_interval_unit,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::provider::DeviceReport;
    use crate::provider::MockWeatherClient;
    use crate::provider::WeatherSnapshot;
    use crate::store::ConfigStore;

    fn input(device_id: &str, cell_index: &str) -> SetupInput {
        SetupInput {
            device_id: device_id.to_string(),
            cell_index: cell_index.to_string(),
        }
    }

    fn named(name: Option<&str>) -> DeviceReport {
        DeviceReport {
            name: name.map(String::from),
            snapshot: WeatherSnapshot::default(),
        }
    }

    fn base_error(result: FlowResult<ConfigRecord>) -> FormError {
        match result {
            FlowResult::ShowForm { step_id, errors } => {
                assert_eq!(step_id, "user");
                assert_eq!(errors.len(), 1);
                errors[BASE]
            }
            FlowResult::CreateEntry(record) => panic!("unexpected entry {:?}", record),
        }
    }

    #[tokio::test]
    async fn test_setup_creates_record() {
        let client = MockWeatherClient::new();
        client.push_ok(named(Some("Station A")));

        let mut flow = SetupFlow::new(&client, HashSet::new());
        assert_eq!(
            flow.start(),
            FlowResult::ShowForm {
                step_id: "user",
                errors: FormErrors::new()
            }
        );

        let FlowResult::CreateEntry(record) = flow.submit(input(" abc123 ", "7")).await else {
            panic!("expected an entry");
        };
        assert_eq!(flow.state(), SetupState::Done);
        assert_eq!(record.entry_id, "abc123");
        assert_eq!(record.device, DeviceReference::new("7", "abc123"));
        assert_eq!(record.display_name, "Station A");
        assert_eq!(
            record.options.polling_interval.as_duration(),
            Duration::from_secs(300)
        );
        assert_eq!(client.requests(), vec![DeviceReference::new("7", "abc123")]);
    }

    #[tokio::test]
    async fn test_setup_falls_back_to_generated_name() {
        let client = MockWeatherClient::new();
        client.push_ok(named(None));

        let mut flow = SetupFlow::new(&client, HashSet::new());
        let FlowResult::CreateEntry(record) = flow.submit(input("abc123", "7")).await else {
            panic!("expected an entry");
        };
        assert_eq!(record.display_name, "WeatherXM abc123");
    }

    #[tokio::test]
    async fn test_setup_requires_fields() {
        let client = MockWeatherClient::new();
        let mut flow = SetupFlow::new(&client, HashSet::new());

        let result = flow.submit(input("  ", "")).await;
        let FlowResult::ShowForm { errors, .. } = result else {
            panic!("expected the form");
        };
        assert_eq!(errors[FIELD_DEVICE_ID], FormError::Required);
        assert_eq!(errors[FIELD_CELL_INDEX], FormError::Required);
        assert_eq!(flow.state(), SetupState::CollectingInput);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_setup_rejects_duplicate_after_normalization() {
        let client = MockWeatherClient::new();
        let configured = HashSet::from(["abc123".to_string()]);
        let mut flow = SetupFlow::new(&client, configured);

        let result = flow.submit(input("ABC-123", "7")).await;
        assert_eq!(base_error(result), FormError::DeviceExists);
        assert_eq!(flow.state(), SetupState::Error);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_setup_after_removal_creates_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::open(dir.path().join("entries.toml")).unwrap();
        store
            .insert(ConfigRecord::new(
                DeviceReference::new("7", "abc123"),
                "Station A".to_string(),
            ))
            .unwrap();
        store.remove("abc123").unwrap();

        let client = MockWeatherClient::new();
        client.push_ok(named(Some("Station A")));

        let mut flow = SetupFlow::new(&client, store.configured_ids());
        let FlowResult::CreateEntry(record) = flow.submit(input("abc123", "7")).await else {
            panic!("expected an entry");
        };
        assert_eq!(record.entry_id, "abc123");
        store.insert(record).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_setup_rejects_second_submission_of_same_device() {
        let client = MockWeatherClient::new();
        client.push_ok(named(Some("Station A")));

        let mut flow = SetupFlow::new(&client, HashSet::new());
        assert!(matches!(
            flow.submit(input("abc123", "7")).await,
            FlowResult::CreateEntry(_)
        ));
        let result = flow.submit(input("abc123", "7")).await;
        assert_eq!(base_error(result), FormError::DeviceExists);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_setup_maps_fetch_errors() {
        let client = MockWeatherClient::new();
        client.push_err(MockWeatherClient::network_error());
        client.push_err(FetchError::Timeout {
            url: "mock://weatherxm".to_string(),
            timeout: Duration::from_secs(10),
        });
        client.push_err(FetchError::NotFound {
            url: "mock://weatherxm".to_string(),
        });
        client.push_err(FetchError::HttpStatus {
            url: "mock://weatherxm".to_string(),
            status: 503,
        });
        client.push_err(FetchError::MalformedResponse {
            url: "mock://weatherxm".to_string(),
            reason: "missing current_weather".to_string(),
        });

        let mut flow = SetupFlow::new(&client, HashSet::new());
        let expected = [
            FormError::CannotConnect,
            FormError::CannotConnect,
            FormError::CannotFetchDeviceName,
            FormError::CannotFetchDeviceName,
            FormError::CannotFetchDeviceName,
        ];
        for error in expected {
            assert_eq!(base_error(flow.submit(input("abc123", "7")).await), error);
            assert_eq!(flow.state(), SetupState::Error);
        }

        // The wizard stays usable after a failure
        client.push_ok(named(Some("Station A")));
        assert!(matches!(
            flow.submit(input("abc123", "7")).await,
            FlowResult::CreateEntry(_)
        ));
    }

    #[test]
    fn test_form_error_names() {
        assert_eq!(FormError::DeviceExists.to_string(), "device_exists");
        assert_eq!(
            FormError::CannotFetchDeviceName.to_string(),
            "cannot_fetch_device_name"
        );
        assert_eq!(
            serde_json::to_value(FormError::InvalidInterval).unwrap(),
            "invalid_interval"
        );
    }

    #[test]
    fn test_options_flow() {
        let flow = OptionsFlow::new(EntryOptions::default());
        let defaults = flow.defaults();
        assert_eq!(defaults.polling_interval_value, 5);
        assert_eq!(defaults.polling_interval_unit, IntervalUnit::Minutes);

        let result = flow.submit(OptionsInput {
            polling_interval_value: 30,
            polling_interval_unit: IntervalUnit::Seconds,
        });
        let FlowResult::CreateEntry(options) = result else {
            panic!("expected options");
        };
        assert_eq!(
            options.polling_interval.as_duration(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_options_flow_rejects_non_positive_interval() {
        let flow = OptionsFlow::new(EntryOptions::default());
        for value in [0, -5] {
            let result = flow.submit(OptionsInput {
                polling_interval_value: value,
                polling_interval_unit: IntervalUnit::Hours,
            });
            assert_eq!(
                result,
                FlowResult::ShowForm {
                    step_id: "init",
                    errors: FormErrors::from([(
                        FIELD_POLLING_INTERVAL_VALUE,
                        FormError::InvalidInterval
                    )]),
                }
            );
        }
    }
}
