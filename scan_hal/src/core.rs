//! Scanner orchestration.
//!
//! [`ScannerCore`] attaches a transport as a model, selects the command set
//! of the model's ASIC through the [`DriverRegistry`], and sequences the
//! compound operations: bring-up, the flatbed calibration, shaded scans,
//! parking and feeding.
//!
//! Calibration results are kept on the device and, when a cache file is
//! configured, persisted across restarts.

use scan_common::hal::config::ScannerConfig;
use scan_common::hal::error::{ScanError, ScanResult};
use scan_common::hal::model::ModelFlags;
use scan_common::hal::transport::{ScanSink, ScannerTransport};
use scan_common::hal::types::{Direction, ScanFlags, ScanParams, ScanSession, StripColor};
use tracing::{debug, info, warn};

use crate::calibration_cache::{CalibrationCache, CalibrationEntry, now_secs};
use crate::command_set::{CommandSet, FrontendAction};
use crate::device::Device;
use crate::driver_registry::DriverRegistry;
use crate::profiles::find_model;
use crate::session::compute_session;

/// One attached scanner with its command set.
pub struct ScannerCore {
    config: ScannerConfig,
    commands: Box<dyn CommandSet>,
    device: Device,
    cache: Option<CalibrationCache>,
}

impl ScannerCore {
    /// Attach `transport` as the model named in `config`.
    ///
    /// A cache file that cannot be read is reported and replaced by an
    /// empty cache.
    ///
    /// # Errors
    /// - `Config` if the configuration does not validate
    /// - `ProfileNotFound` if the model is unknown
    /// - `UnsupportedConfiguration` if no command set handles its ASIC
    pub fn new(config: ScannerConfig, transport: Box<dyn ScannerTransport>) -> ScanResult<Self> {
        config
            .validate()
            .map_err(|e| ScanError::Config(e.to_string()))?;
        let model = find_model(&config.model)?;

        let commands = DriverRegistry::with_builtin()?.for_model(&model)?;

        let cache = config.calibration.cache_file.as_ref().map(|path| {
            let mut cache = CalibrationCache::new(path, config.calibration.expiration_minutes);
            if let Err(e) = cache.load() {
                warn!("Ignoring calibration cache: {}", e);
            }
            cache
        });

        info!(
            "Attached {} {} ({} command set)",
            model.vendor,
            model.name,
            commands.name()
        );
        let device = Device::new(model, transport, config.timing, commands.register_port());
        Ok(Self {
            config,
            commands,
            device,
            cache,
        })
    }

    /// The attached device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The attached device, mutably.
    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// The selected command set.
    pub fn commands(&self) -> &dyn CommandSet {
        self.commands.as_ref()
    }

    /// The calibration cache, when one is configured.
    pub fn cache(&self) -> Option<&CalibrationCache> {
        self.cache.as_ref()
    }

    /// Bring the scanner up and park the head.
    pub fn init(&mut self) -> ScanResult<()> {
        let dev = &mut self.device;
        self.commands.init_registers(dev);
        let cold = self.commands.is_cold(dev)?;
        self.commands.boot(dev, cold)?;
        self.commands.slow_back_home(dev, true)?;
        info!("{} ready", dev.model.name);
        Ok(())
    }

    /// Hardware resolution and calibration resolution used for `params`.
    fn calibration_key(&self, params: &ScanParams) -> ScanResult<(u32, u32)> {
        let model = &self.device.model;
        let session = compute_session(model, params, &model.sensor)?;
        let ppsp = model.sensor.ccd_pixels_per_system_pixel.max(1);
        Ok((session.hw_dpi, session.hw_dpi / ppsp))
    }

    fn calibration_matches(&self, hw_dpi: u32, calib_xres: u32) -> bool {
        self.device
            .calibration
            .as_ref()
            .is_some_and(|entry| entry.matches(self.device.model.name, hw_dpi, calib_xres))
    }

    fn restore_calibration(&mut self, entry: CalibrationEntry) -> ScanResult<()> {
        let dev = &mut self.device;
        dev.frontend = entry.frontend;
        dev.led_exposure = entry.led_exposure;
        self.commands.set_fe(dev, FrontendAction::Set)?;
        info!(
            "Using cached calibration for {} dpi (created at {})",
            entry.hw_dpi, entry.created_at
        );
        dev.calibration = Some(entry);
        Ok(())
    }

    /// Calibrate for scans like `params`.
    ///
    /// A fresh cache entry is used instead unless `force` is configured.
    pub fn calibrate(&mut self, params: &ScanParams) -> ScanResult<()> {
        let (hw_dpi, calib_xres) = self.calibration_key(params)?;

        if !self.config.calibration.force {
            let cached = self.cache.as_ref().and_then(|cache| {
                cache
                    .find(self.device.model.name, hw_dpi, calib_xres, now_secs())
                    .cloned()
            });
            if let Some(entry) = cached {
                return self.restore_calibration(entry);
            }
        }

        let commands = self.commands.as_ref();
        let dev = &mut self.device;
        let flags = dev.model.flags;
        info!("Calibrating at {} dpi ({} dpi hardware)", calib_xres, hw_dpi);

        commands.slow_back_home(dev, true)?;
        if dev.model.y_offset_calib_white > 0 {
            commands.feed(dev, dev.model.y_offset_calib_white)?;
        }

        commands.offset_calibration(dev, calib_xres)?;
        commands.coarse_gain_calibration(dev, calib_xres, params.xres)?;
        if dev.model.is_cis && flags.contains(ModelFlags::LED_CALIBRATION) {
            commands.led_calibration(dev, calib_xres)?;
            commands.offset_calibration(dev, calib_xres)?;
            commands.coarse_gain_calibration(dev, calib_xres, params.xres)?;
        }
        if flags.contains(ModelFlags::SEARCH_STRIP) {
            commands.search_strip(dev, Direction::Forward, StripColor::White)?;
        }
        let shading = commands.shading_calibration(dev, calib_xres)?;

        let entry = CalibrationEntry {
            model: dev.model.name.to_string(),
            hw_dpi,
            calib_xres,
            frontend: dev.frontend,
            led_exposure: dev.led_exposure,
            shading,
            created_at: now_secs(),
        };
        dev.calib_reg = Some(dev.reg.clone());
        dev.calibration = Some(entry.clone());

        if let Some(cache) = self.cache.as_mut() {
            cache.insert(entry);
            if let Err(e) = cache.save() {
                warn!("Calibration not cached: {}", e);
            }
        }
        info!("Calibration complete");
        Ok(())
    }

    /// Scan `params` and hand the raw data to `sink`.
    ///
    /// The request is relative to the document corner; the model offsets
    /// are added here. Shaded scans calibrate first when the current
    /// calibration does not cover the request. Registers start from the
    /// calibration snapshot when there is one.
    pub fn scan(&mut self, params: &ScanParams, sink: &mut dyn ScanSink) -> ScanResult<ScanSession> {
        params.validate()?;
        let mut params = params.clone();
        params.startx = params.startx.saturating_add(self.device.model.x_offset);
        params.starty = params.starty.saturating_add(self.device.model.y_offset);

        let shaded = !params.flags.contains(ScanFlags::DISABLE_SHADING);
        if shaded {
            let (hw_dpi, calib_xres) = self.calibration_key(&params)?;
            if !self.calibration_matches(hw_dpi, calib_xres) {
                self.calibrate(&params)?;
            }
        }

        let commands = self.commands.as_ref();
        let dev = &mut self.device;
        if dev.scanhead_position_in_steps != 0 {
            commands.slow_back_home(dev, true)?;
        }

        let session = compute_session(&dev.model, &params, &dev.model.sensor)?;
        let mut regs = dev.calib_reg.clone().unwrap_or_else(|| dev.reg.clone());
        commands.init_regs_for_scan_session(dev, &mut regs, &session)?;
        if shaded && let Some(entry) = dev.calibration.clone() {
            commands.send_shading_data(dev, &session, &entry.shading, entry.calib_xres)?;
        }

        commands.begin_scan(dev, &mut regs, true)?;
        let data = match commands.read_data(dev, &session) {
            Ok(data) => data,
            Err(e) => {
                if let Err(stop) = commands.end_scan(dev, &mut regs, true) {
                    warn!("end_scan after failed read: {}", stop);
                }
                return Err(e);
            }
        };
        commands.end_scan(dev, &mut regs, true)?;
        dev.reg = regs;
        dev.track_scan_motion(&session);
        debug!(
            "scan done, head at {} steps",
            dev.scanhead_position_in_steps
        );

        sink.consume(&session, &data)?;
        info!(
            "Scanned {} lines of {} bytes",
            session.output_line_count, session.output_line_bytes_raw
        );
        Ok(session)
    }

    /// Return the head home and wait for it.
    pub fn park(&mut self) -> ScanResult<()> {
        self.commands.slow_back_home(&mut self.device, true)
    }

    /// Move the head `steps` base steps away from home.
    pub fn feed(&mut self, steps: u32) -> ScanResult<()> {
        self.commands.feed(&mut self.device, steps)
    }

    /// Move the head onto a calibration strip.
    pub fn locate_strip(&mut self, direction: Direction, color: StripColor) -> ScanResult<()> {
        self.commands.search_strip(&mut self.device, direction, color)
    }
}

impl std::fmt::Debug for ScannerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerCore")
            .field("model", &self.device.model.name)
            .field("commands", &self.commands.name())
            .field("cache", &self.cache.as_ref().map(CalibrationCache::path))
            .finish()
    }
}
