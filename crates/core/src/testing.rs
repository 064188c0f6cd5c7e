//! Scripted collaborators shared by the unit tests.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    assets::{BackdropImage, Rgba},
    audio::{AnalyserNode, ReadStatus},
    render::{BlendMode, DrawingSurface, GradientStop, SurfaceCapabilities},
    PulseVizError, Result,
};

/// Analysis node whose snapshots are set directly by the test.
pub(crate) struct ScriptedNode {
    fft_size: usize,
    frequency: Mutex<Vec<u8>>,
    waveform: Mutex<Vec<u8>>,
    failing: AtomicBool,
    busy: AtomicBool,
}

impl ScriptedNode {
    pub fn new(fft_size: usize) -> Arc<Self> {
        Arc::new(Self {
            fft_size,
            frequency: Mutex::new(vec![0; fft_size / 2]),
            waveform: Mutex::new(vec![128; fft_size]),
            failing: AtomicBool::new(false),
            busy: AtomicBool::new(false),
        })
    }

    /// Overwrites the leading bins; the rest keep their value.
    pub fn set_frequency(&self, data: &[u8]) {
        let mut frequency = self.frequency.lock().unwrap();
        let n = data.len().min(frequency.len());
        frequency[..n].copy_from_slice(&data[..n]);
    }

    pub fn fill_waveform(&self, value: u8) {
        self.waveform.lock().unwrap().fill(value);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    fn read(&self, source: &Mutex<Vec<u8>>, out: &mut [u8]) -> Result<ReadStatus> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PulseVizError::extraction("scripted read failure"));
        }
        if self.busy.load(Ordering::SeqCst) {
            return Ok(ReadStatus::Busy);
        }
        out.copy_from_slice(&source.lock().unwrap());
        Ok(ReadStatus::Fresh)
    }
}

impl AnalyserNode for ScriptedNode {
    fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn decibel_range(&self) -> (f32, f32) {
        (-100.0, -30.0)
    }

    fn byte_frequency_data(&self, out: &mut [u8]) -> Result<ReadStatus> {
        self.read(&self.frequency, out)
    }

    fn byte_time_domain_data(&self, out: &mut [u8]) -> Result<ReadStatus> {
        self.read(&self.waveform, out)
    }
}

/// One recorded drawing call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DrawCall {
    Clear,
    Rect(BlendMode),
    LinearGradient(BlendMode),
    Radial(BlendMode),
    Image,
}

/// Surface that records calls and fails on demand.
///
/// `log` keeps every accepted call. `visible` holds the calls of the last
/// presented frame, or direct calls made outside a frame.
#[derive(Debug)]
pub(crate) struct RecordingSurface {
    pub width: u32,
    pub height: u32,
    pub capabilities: SurfaceCapabilities,
    log: Rc<RefCell<Vec<DrawCall>>>,
    visible: Rc<RefCell<Vec<DrawCall>>>,
    staged: Option<Vec<DrawCall>>,
    /// Every call fails while set.
    pub failing: bool,
    /// Only gradient and non-normal blend calls fail while set.
    pub reject_advanced: bool,
    /// Everything but `clear` fails while set. Shared so tests can flip it
    /// after the surface is boxed.
    pub fail_after_clear: Rc<Cell<bool>>,
}

impl RecordingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            capabilities: SurfaceCapabilities::full(),
            log: Rc::default(),
            visible: Rc::default(),
            staged: None,
            failing: false,
            reject_advanced: false,
            fail_after_clear: Rc::default(),
        }
    }

    pub fn calls(&self) -> Vec<DrawCall> {
        self.log.borrow().clone()
    }

    /// Handle on the call log that outlives the surface being boxed away.
    pub fn log(&self) -> Rc<RefCell<Vec<DrawCall>>> {
        Rc::clone(&self.log)
    }

    /// Handle on what is currently on screen.
    pub fn visible(&self) -> Rc<RefCell<Vec<DrawCall>>> {
        Rc::clone(&self.visible)
    }

    fn record(&mut self, call: DrawCall) -> Result<()> {
        if self.failing || (self.fail_after_clear.get() && call != DrawCall::Clear) {
            return Err(PulseVizError::render("scripted surface failure"));
        }
        let advanced = match &call {
            DrawCall::LinearGradient(_) | DrawCall::Radial(_) => true,
            DrawCall::Rect(mode) => *mode != BlendMode::Normal,
            _ => false,
        };
        if self.reject_advanced && advanced {
            return Err(PulseVizError::render("scripted unsupported operation"));
        }
        self.log.borrow_mut().push(call.clone());
        match &mut self.staged {
            Some(frame) => frame.push(call),
            None => self.visible.borrow_mut().push(call),
        }
        Ok(())
    }
}

impl DrawingSurface for RecordingSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capabilities(&self) -> SurfaceCapabilities {
        self.capabilities
    }

    fn begin_frame(&mut self) -> Result<()> {
        if self.failing {
            return Err(PulseVizError::render("scripted surface failure"));
        }
        self.staged = Some(Vec::new());
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        if let Some(frame) = self.staged.take() {
            *self.visible.borrow_mut() = frame;
        }
        Ok(())
    }

    fn discard_frame(&mut self) {
        self.staged = None;
    }

    fn clear(&mut self, _color: Rgba) -> Result<()> {
        self.record(DrawCall::Clear)
    }

    fn fill_rect(&mut self, _rect: kurbo::Rect, _color: Rgba, blend: BlendMode) -> Result<()> {
        self.record(DrawCall::Rect(blend))
    }

    fn fill_linear_gradient(
        &mut self,
        _rect: kurbo::Rect,
        _start: kurbo::Point,
        _end: kurbo::Point,
        _stops: &[GradientStop],
        blend: BlendMode,
    ) -> Result<()> {
        self.record(DrawCall::LinearGradient(blend))
    }

    fn fill_radial(
        &mut self,
        _center: kurbo::Point,
        _radius: f64,
        _inner: Rgba,
        _outer: Rgba,
        blend: BlendMode,
    ) -> Result<()> {
        self.record(DrawCall::Radial(blend))
    }

    fn draw_image(&mut self, _image: &BackdropImage, _rect: kurbo::Rect) -> Result<()> {
        self.record(DrawCall::Image)
    }
}
