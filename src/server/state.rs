use crate::location::LocationProvider;
use crate::probe::BackendProbe;
use std::sync::Mutex;

pub struct AppState {
    pub provider: Mutex<LocationProvider>,
    pub probe: BackendProbe,
}
