use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::base::{DeviceContext, StateMap};
use super::{
    ControllerState, ExposureController, FlashController, FocusController, HdrController,
    IsoController, OisController, ParameterController, ShutterSpeedController,
    WhiteBalanceController, ZoomController,
};

/// Aggregate over every controller of the current device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Ready,
    Error(String),
}

/// One instance of every controller, built for a single device context.
pub struct ControllerSet {
    pub flash: Arc<FlashController>,
    pub focus: Arc<FocusController>,
    pub zoom: Arc<ZoomController>,
    pub iso: Arc<IsoController>,
    pub white_balance: Arc<WhiteBalanceController>,
    pub exposure: Arc<ExposureController>,
    pub shutter_speed: Arc<ShutterSpeedController>,
    pub hdr: Arc<HdrController>,
    pub ois: Arc<OisController>,
}

impl ControllerSet {
    fn build(context: &DeviceContext) -> Self {
        log::debug!(
            "Building controllers for camera {}",
            context.descriptor.physical_id
        );
        Self {
            flash: Arc::new(FlashController::new(context.clone())),
            focus: Arc::new(FocusController::new(context.clone())),
            zoom: Arc::new(ZoomController::new(context.clone())),
            iso: Arc::new(IsoController::new(context.clone())),
            white_balance: Arc::new(WhiteBalanceController::new(context.clone())),
            exposure: Arc::new(ExposureController::new(context.clone())),
            shutter_speed: Arc::new(ShutterSpeedController::new(context.clone())),
            hdr: Arc::new(HdrController::new(context.clone())),
            ois: Arc::new(OisController::new(context.clone())),
        }
    }

    pub fn all(&self) -> Vec<Arc<dyn ParameterController>> {
        vec![
            self.flash.clone() as Arc<dyn ParameterController>,
            self.focus.clone() as Arc<dyn ParameterController>,
            self.zoom.clone() as Arc<dyn ParameterController>,
            self.iso.clone() as Arc<dyn ParameterController>,
            self.white_balance.clone() as Arc<dyn ParameterController>,
            self.exposure.clone() as Arc<dyn ParameterController>,
            self.shutter_speed.clone() as Arc<dyn ParameterController>,
            self.hdr.clone() as Arc<dyn ParameterController>,
            self.ois.clone() as Arc<dyn ParameterController>,
        ]
    }
}

/// Owns the controllers of the currently bound device.
///
/// The set is built lazily on first access and memoized until
/// [`ControllerRegistry::release_all`] or the next [`ControllerRegistry::bind`].
pub struct ControllerRegistry {
    context: RwLock<DeviceContext>,
    set: Mutex<Option<Arc<ControllerSet>>>,
    states: Arc<watch::Sender<StateMap>>,
    manager: watch::Sender<ManagerState>,
    bulk: tokio::sync::Mutex<()>,
}

impl ControllerRegistry {
    pub fn new(mut context: DeviceContext) -> Self {
        let states = Arc::new(watch::channel(StateMap::new()).0);
        context.state_map = states.clone();
        Self {
            context: RwLock::new(context),
            set: Mutex::new(None),
            states,
            manager: watch::channel(ManagerState::Uninitialized).0,
            bulk: tokio::sync::Mutex::new(()),
        }
    }

    /// Point the registry at a newly opened device. Controllers built for the
    /// previous device are dropped; release them first.
    pub fn bind(&self, mut context: DeviceContext) {
        context.state_map = self.states.clone();
        log::debug!("Binding controllers to camera {}", context.descriptor.physical_id);
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = context;
        if self
            .set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            log::warn!("Rebinding registry with live controllers; dropping them");
        }
        self.states.send_replace(StateMap::new());
        self.manager.send_replace(ManagerState::Uninitialized);
    }

    pub fn context(&self) -> DeviceContext {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn controller_set(&self) -> Arc<ControllerSet> {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = set.as_ref() {
            return existing.clone();
        }
        let built = Arc::new(ControllerSet::build(&self.context()));
        *set = Some(built.clone());
        built
    }

    pub fn flash(&self) -> Arc<FlashController> {
        self.controller_set().flash.clone()
    }

    pub fn focus(&self) -> Arc<FocusController> {
        self.controller_set().focus.clone()
    }

    pub fn zoom(&self) -> Arc<ZoomController> {
        self.controller_set().zoom.clone()
    }

    pub fn iso(&self) -> Arc<IsoController> {
        self.controller_set().iso.clone()
    }

    pub fn white_balance(&self) -> Arc<WhiteBalanceController> {
        self.controller_set().white_balance.clone()
    }

    pub fn exposure(&self) -> Arc<ExposureController> {
        self.controller_set().exposure.clone()
    }

    pub fn shutter_speed(&self) -> Arc<ShutterSpeedController> {
        self.controller_set().shutter_speed.clone()
    }

    pub fn hdr(&self) -> Arc<HdrController> {
        self.controller_set().hdr.clone()
    }

    pub fn ois(&self) -> Arc<OisController> {
        self.controller_set().ois.clone()
    }

    pub fn all_controllers(&self) -> Vec<Arc<dyn ParameterController>> {
        self.controller_set().all()
    }

    /// Initialize every supported controller. One controller failing does
    /// not stop the others; the aggregate reports how many failed.
    pub async fn initialize_all(&self) -> ManagerState {
        let _bulk = self.bulk.lock().await;
        self.manager.send_replace(ManagerState::Initializing);

        if self.context().session.current().is_none() {
            log::warn!("Cannot initialize controllers without a capture session");
            return self.publish(ManagerState::Error("No active capture session".to_string()));
        }

        let mut failures = Vec::new();
        for controller in self.all_controllers() {
            if !controller.is_supported() {
                log::debug!("{} not supported, skipping", controller.name());
                continue;
            }
            if let Err(e) = controller.initialize().await {
                log::warn!("{} failed to initialize: {}", controller.name(), e);
                failures.push(format!("{}: {}", controller.name(), e));
            }
        }

        let state = if self.are_all_controllers_ready() {
            ManagerState::Ready
        } else {
            let mut failed: Vec<String> = self
                .controller_errors()
                .into_iter()
                .map(|(name, msg)| format!("{}: {}", name, msg))
                .collect();
            if failed.is_empty() {
                failed = failures;
            }
            ManagerState::Error(format!(
                "{} controller(s) failed: {}",
                failed.len(),
                failed.join("; ")
            ))
        };
        log::info!("Controller initialization finished: {:?}", state);
        self.publish(state)
    }

    /// Release every built controller and forget them; the next access
    /// builds fresh instances.
    pub async fn release_all(&self) {
        let _bulk = self.bulk.lock().await;
        let released = self
            .set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(set) = released {
            for controller in set.all() {
                controller.release().await;
            }
        }
        self.states.send_replace(StateMap::new());
        self.publish(ManagerState::Uninitialized);
        log::debug!("All controllers released");
    }

    /// Reset the controllers that are currently Ready.
    pub async fn reset_all(&self) {
        let _bulk = self.bulk.lock().await;
        for controller in self.all_controllers() {
            if controller.state().is_ready() {
                if let Err(e) = controller.reset().await {
                    log::warn!("{} failed to reset: {}", controller.name(), e);
                }
            }
        }
    }

    pub fn supported_controllers(&self) -> Vec<Arc<dyn ParameterController>> {
        self.all_controllers()
            .into_iter()
            .filter(|controller| controller.is_supported())
            .collect()
    }

    pub fn enabled_controllers(&self) -> Vec<Arc<dyn ParameterController>> {
        self.supported_controllers()
            .into_iter()
            .filter(|controller| controller.is_enabled())
            .collect()
    }

    pub fn state_map(&self) -> BTreeMap<String, ControllerState> {
        self.states.borrow().clone()
    }

    pub fn state_stream(&self) -> watch::Receiver<BTreeMap<String, ControllerState>> {
        self.states.subscribe()
    }

    pub fn manager_state(&self) -> ManagerState {
        self.manager.borrow().clone()
    }

    pub fn manager_state_stream(&self) -> watch::Receiver<ManagerState> {
        self.manager.subscribe()
    }

    /// Every supported controller is Ready or mid-write.
    pub fn are_all_controllers_ready(&self) -> bool {
        self.supported_controllers()
            .iter()
            .all(|controller| controller.state().is_operational())
    }

    pub fn controller_errors(&self) -> Vec<(String, String)> {
        self.all_controllers()
            .into_iter()
            .filter_map(|controller| match controller.state() {
                ControllerState::Error(msg) => Some((controller.name().to_string(), msg)),
                _ => None,
            })
            .collect()
    }

    fn publish(&self, state: ManagerState) -> ManagerState {
        self.manager.send_replace(state.clone());
        state
    }
}
