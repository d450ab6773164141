//! ALSA PCM 输出
//!
//! 运行时通过 libloading 加载 libasound，不需要链接期依赖；
//! 找不到库时打开设备返回 Unavailable。
//! 直接调用 C 接口，不经过额外封装：
//! - 非阻塞打开（SND_PCM_NONBLOCK），队列满时返回 -EAGAIN
//! - RW_INTERLEAVED（push）或 MMAP_INTERLEAVED（mapped）访问
//! - S16_LE 格式，采样率以 set_rate_near 的回读值为准
//! - snd_pcm_delay 提供硬件播放位置

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_long, c_uint, c_ulong, c_void, CStr, CString};
use std::ptr;
use std::sync::OnceLock;

use libloading::Library;

use super::device::{
    AccessStyle, DeviceError, DeviceState, HwParams, HwRequest, MappedDevice, MmapArea, PcmDevice,
    PushDevice,
};

/// ALSA 类型定义
#[repr(C)]
struct snd_pcm_t {
    _private: [u8; 0],
}

#[repr(C)]
struct snd_pcm_hw_params_t {
    _private: [u8; 0],
}

#[repr(C)]
struct snd_pcm_channel_area_t {
    addr: *mut c_void,
    /// 第一个样本的位偏移
    first: c_uint,
    /// 相邻样本间的位距离
    step: c_uint,
}

type snd_pcm_uframes_t = c_ulong;
type snd_pcm_sframes_t = c_long;

const SND_PCM_STREAM_PLAYBACK: c_int = 0;
const SND_PCM_NONBLOCK: c_int = 0x0001;

const SND_PCM_ACCESS_MMAP_INTERLEAVED: c_uint = 0;
const SND_PCM_ACCESS_RW_INTERLEAVED: c_uint = 3;

const SND_PCM_FORMAT_S16_LE: c_int = 2;

// snd_pcm_state_t
const SND_PCM_STATE_OPEN: c_int = 0;
const SND_PCM_STATE_SETUP: c_int = 1;
const SND_PCM_STATE_PREPARED: c_int = 2;
const SND_PCM_STATE_RUNNING: c_int = 3;
const SND_PCM_STATE_XRUN: c_int = 4;
const SND_PCM_STATE_DRAINING: c_int = 5;
const SND_PCM_STATE_PAUSED: c_int = 6;
const SND_PCM_STATE_SUSPENDED: c_int = 7;

/// 运行时加载的 libasound
const LIBRARY_NAME: &str = "libasound.so.2";

/// 生成函数指针表及其加载代码
macro_rules! alsa_api {
    ($(fn $name:ident($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty;)*) => {
        struct AlsaApi {
            _lib: Library,
            $($name: unsafe extern "C" fn($($ty),*) -> $ret,)*
        }

        impl AlsaApi {
            fn load() -> Result<Self, libloading::Error> {
                // SAFETY: libasound 初始化时没有全局副作用
                let lib = unsafe { Library::new(LIBRARY_NAME) }?;
                $(
                    // SAFETY: 签名与 alsa/pcm.h 中的声明一致
                    let $name = unsafe {
                        *lib.get::<unsafe extern "C" fn($($ty),*) -> $ret>(
                            concat!(stringify!($name), "\0").as_bytes(),
                        )?
                    };
                )*
                Ok(Self { _lib: lib, $($name,)* })
            }
        }
    };
}

alsa_api! {
    fn snd_pcm_open(
        pcm: *mut *mut snd_pcm_t,
        name: *const c_char,
        stream: c_int,
        mode: c_int,
    ) -> c_int;
    fn snd_pcm_close(pcm: *mut snd_pcm_t) -> c_int;
    fn snd_pcm_nonblock(pcm: *mut snd_pcm_t, nonblock: c_int) -> c_int;

    fn snd_pcm_hw_params_malloc(params: *mut *mut snd_pcm_hw_params_t) -> c_int;
    fn snd_pcm_hw_params_free(params: *mut snd_pcm_hw_params_t) -> ();
    fn snd_pcm_hw_params_any(pcm: *mut snd_pcm_t, params: *mut snd_pcm_hw_params_t) -> c_int;
    fn snd_pcm_hw_params_set_access(
        pcm: *mut snd_pcm_t,
        params: *mut snd_pcm_hw_params_t,
        access: c_uint,
    ) -> c_int;
    fn snd_pcm_hw_params_set_format(
        pcm: *mut snd_pcm_t,
        params: *mut snd_pcm_hw_params_t,
        format: c_int,
    ) -> c_int;
    fn snd_pcm_hw_params_set_channels(
        pcm: *mut snd_pcm_t,
        params: *mut snd_pcm_hw_params_t,
        channels: c_uint,
    ) -> c_int;
    fn snd_pcm_hw_params_set_rate_near(
        pcm: *mut snd_pcm_t,
        params: *mut snd_pcm_hw_params_t,
        rate: *mut c_uint,
        dir: *mut c_int,
    ) -> c_int;
    fn snd_pcm_hw_params_set_period_size_near(
        pcm: *mut snd_pcm_t,
        params: *mut snd_pcm_hw_params_t,
        frames: *mut snd_pcm_uframes_t,
        dir: *mut c_int,
    ) -> c_int;
    fn snd_pcm_hw_params_set_buffer_size_near(
        pcm: *mut snd_pcm_t,
        params: *mut snd_pcm_hw_params_t,
        frames: *mut snd_pcm_uframes_t,
    ) -> c_int;
    fn snd_pcm_hw_params(pcm: *mut snd_pcm_t, params: *mut snd_pcm_hw_params_t) -> c_int;
    fn snd_pcm_hw_params_get_rate(
        params: *const snd_pcm_hw_params_t,
        rate: *mut c_uint,
        dir: *mut c_int,
    ) -> c_int;
    fn snd_pcm_hw_params_get_channels(
        params: *const snd_pcm_hw_params_t,
        channels: *mut c_uint,
    ) -> c_int;
    fn snd_pcm_hw_params_get_period_size(
        params: *const snd_pcm_hw_params_t,
        frames: *mut snd_pcm_uframes_t,
        dir: *mut c_int,
    ) -> c_int;
    fn snd_pcm_hw_params_get_buffer_size(
        params: *const snd_pcm_hw_params_t,
        frames: *mut snd_pcm_uframes_t,
    ) -> c_int;

    fn snd_pcm_state(pcm: *mut snd_pcm_t) -> c_int;
    fn snd_pcm_prepare(pcm: *mut snd_pcm_t) -> c_int;
    fn snd_pcm_start(pcm: *mut snd_pcm_t) -> c_int;
    fn snd_pcm_drain(pcm: *mut snd_pcm_t) -> c_int;
    fn snd_pcm_delay(pcm: *mut snd_pcm_t, delay: *mut snd_pcm_sframes_t) -> c_int;

    fn snd_pcm_writei(
        pcm: *mut snd_pcm_t,
        buffer: *const c_void,
        size: snd_pcm_uframes_t,
    ) -> snd_pcm_sframes_t;

    fn snd_pcm_avail_update(pcm: *mut snd_pcm_t) -> snd_pcm_sframes_t;
    fn snd_pcm_mmap_begin(
        pcm: *mut snd_pcm_t,
        areas: *mut *const snd_pcm_channel_area_t,
        offset: *mut snd_pcm_uframes_t,
        frames: *mut snd_pcm_uframes_t,
    ) -> c_int;
    fn snd_pcm_mmap_commit(
        pcm: *mut snd_pcm_t,
        offset: snd_pcm_uframes_t,
        frames: snd_pcm_uframes_t,
    ) -> snd_pcm_sframes_t;

    fn snd_strerror(errnum: c_int) -> *const c_char;
}

/// 第一次打开设备时加载 libasound，之后复用
fn api() -> Result<&'static AlsaApi, DeviceError> {
    static API: OnceLock<Result<AlsaApi, String>> = OnceLock::new();
    API.get_or_init(|| {
        AlsaApi::load().map_err(|e| {
            log::debug!("Failed to load {}: {}", LIBRARY_NAME, e);
            e.to_string()
        })
    })
    .as_ref()
    .map_err(|e| DeviceError::os("dlopen", -libc::ENOENT, format!("{}: {}", LIBRARY_NAME, e)))
}

/// ALSA 错误码描述
fn strerror(api: &AlsaApi, code: c_int) -> String {
    let ptr = unsafe { (api.snd_strerror)(code) };
    if ptr.is_null() {
        return format!("error {}", code);
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// 负返回值转换为 DeviceError
fn check(api: &AlsaApi, call: &'static str, code: c_long) -> Result<usize, DeviceError> {
    if code >= 0 {
        return Ok(code as usize);
    }
    let code = code as c_int;
    if code == -libc::EAGAIN {
        Err(DeviceError::WouldBlock)
    } else if code == -libc::EPIPE || code == -libc::ESTRPIPE {
        Err(DeviceError::Xrun)
    } else {
        Err(DeviceError::os(call, code, strerror(api, code)))
    }
}

/// hw_params 的 RAII 包装
struct HwParamsGuard {
    api: &'static AlsaApi,
    ptr: *mut snd_pcm_hw_params_t,
}

impl HwParamsGuard {
    fn new(api: &'static AlsaApi) -> Result<Self, DeviceError> {
        let mut ptr = ptr::null_mut();
        check(api, "snd_pcm_hw_params_malloc", unsafe {
            (api.snd_pcm_hw_params_malloc)(&mut ptr)
        } as c_long)?;
        Ok(Self { api, ptr })
    }
}

impl Drop for HwParamsGuard {
    fn drop(&mut self) {
        unsafe { (self.api.snd_pcm_hw_params_free)(self.ptr) };
    }
}

/// ALSA 打开失败的分类
#[derive(Debug)]
pub enum AlsaOpenError {
    /// 设备不存在或被占用
    Unavailable(DeviceError),
    /// 格式参数无法协商
    Format(DeviceError),
}

/// ALSA PCM 设备
pub struct AlsaDevice {
    api: &'static AlsaApi,
    pcm: *mut snd_pcm_t,
    name: String,
    params: HwParams,
    access: AccessStyle,
    /// mmap_begin 返回的区域基址（仅 mapped 方式）
    mmap_base: *mut i16,
}

impl AlsaDevice {
    /// 打开并配置 PCM
    pub fn open(name: &str, request: &HwRequest) -> Result<Self, AlsaOpenError> {
        let api = api().map_err(AlsaOpenError::Unavailable)?;
        let c_name = CString::new(name).map_err(|_| {
            AlsaOpenError::Unavailable(DeviceError::os("snd_pcm_open", -libc::EINVAL, "bad name"))
        })?;

        let mut pcm = ptr::null_mut();
        let err = unsafe {
            (api.snd_pcm_open)(
                &mut pcm,
                c_name.as_ptr(),
                SND_PCM_STREAM_PLAYBACK,
                SND_PCM_NONBLOCK,
            )
        };
        check(api, "snd_pcm_open", err as c_long).map_err(AlsaOpenError::Unavailable)?;

        let mut device = Self {
            api,
            pcm,
            name: name.to_string(),
            params: HwParams {
                channels: request.channels,
                rate: request.rate,
                period_frames: request.period_frames,
                buffer_frames: request.buffer_frames,
            },
            access: request.access,
            mmap_base: ptr::null_mut(),
        };
        // 配置失败时 device 被 drop，句柄随之关闭
        device.configure(request).map_err(AlsaOpenError::Format)?;

        log::info!(
            "ALSA device '{}': {}ch {}Hz, period {} frames, buffer {} frames, {:?} access",
            device.name,
            device.params.channels,
            device.params.rate,
            device.params.period_frames,
            device.params.buffer_frames,
            device.access
        );

        Ok(device)
    }

    fn configure(&mut self, request: &HwRequest) -> Result<(), DeviceError> {
        let api = self.api;
        let hw = HwParamsGuard::new(api)?;
        let (pcm, params) = (self.pcm, hw.ptr);

        let access = match request.access {
            AccessStyle::Push => SND_PCM_ACCESS_RW_INTERLEAVED,
            AccessStyle::Mapped => SND_PCM_ACCESS_MMAP_INTERLEAVED,
        };

        let mut rate = request.rate as c_uint;
        let mut period = request.period_frames as snd_pcm_uframes_t;
        let mut buffer = request.buffer_frames as snd_pcm_uframes_t;

        unsafe {
            check(
                api,
                "snd_pcm_hw_params_any",
                (api.snd_pcm_hw_params_any)(pcm, params) as c_long,
            )?;
            check(
                api,
                "snd_pcm_hw_params_set_access",
                (api.snd_pcm_hw_params_set_access)(pcm, params, access) as c_long,
            )?;
            check(
                api,
                "snd_pcm_hw_params_set_format",
                (api.snd_pcm_hw_params_set_format)(pcm, params, SND_PCM_FORMAT_S16_LE) as c_long,
            )?;
            check(
                api,
                "snd_pcm_hw_params_set_channels",
                (api.snd_pcm_hw_params_set_channels)(pcm, params, request.channels as c_uint)
                    as c_long,
            )?;
            check(
                api,
                "snd_pcm_hw_params_set_rate_near",
                (api.snd_pcm_hw_params_set_rate_near)(pcm, params, &mut rate, ptr::null_mut())
                    as c_long,
            )?;
            check(
                api,
                "snd_pcm_hw_params_set_period_size_near",
                (api.snd_pcm_hw_params_set_period_size_near)(
                    pcm,
                    params,
                    &mut period,
                    ptr::null_mut(),
                ) as c_long,
            )?;
            check(
                api,
                "snd_pcm_hw_params_set_buffer_size_near",
                (api.snd_pcm_hw_params_set_buffer_size_near)(pcm, params, &mut buffer) as c_long,
            )?;
            check(
                api,
                "snd_pcm_hw_params",
                (api.snd_pcm_hw_params)(pcm, params) as c_long,
            )?;

            // 回读实际协商值
            let mut channels: c_uint = 0;
            check(
                api,
                "snd_pcm_hw_params_get_channels",
                (api.snd_pcm_hw_params_get_channels)(params, &mut channels) as c_long,
            )?;
            check(
                api,
                "snd_pcm_hw_params_get_rate",
                (api.snd_pcm_hw_params_get_rate)(params, &mut rate, ptr::null_mut()) as c_long,
            )?;
            check(
                api,
                "snd_pcm_hw_params_get_period_size",
                (api.snd_pcm_hw_params_get_period_size)(params, &mut period, ptr::null_mut())
                    as c_long,
            )?;
            check(
                api,
                "snd_pcm_hw_params_get_buffer_size",
                (api.snd_pcm_hw_params_get_buffer_size)(params, &mut buffer) as c_long,
            )?;

            self.params = HwParams {
                channels: channels as u16,
                rate,
                period_frames: period as usize,
                buffer_frames: buffer as usize,
            };
        }

        Ok(())
    }

    fn check(&self, call: &'static str, code: c_long) -> Result<usize, DeviceError> {
        check(self.api, call, code)
    }

    fn frame_samples(&self) -> usize {
        self.params.channels as usize
    }
}

impl PcmDevice for AlsaDevice {
    fn params(&self) -> HwParams {
        self.params
    }

    fn state(&mut self) -> DeviceState {
        if self.pcm.is_null() {
            return DeviceState::Disconnected;
        }
        match unsafe { (self.api.snd_pcm_state)(self.pcm) } {
            SND_PCM_STATE_OPEN => DeviceState::Open,
            SND_PCM_STATE_SETUP => DeviceState::Setup,
            SND_PCM_STATE_PREPARED => DeviceState::Prepared,
            SND_PCM_STATE_RUNNING => DeviceState::Running,
            SND_PCM_STATE_XRUN => DeviceState::Xrun,
            SND_PCM_STATE_DRAINING => DeviceState::Draining,
            SND_PCM_STATE_PAUSED => DeviceState::Paused,
            SND_PCM_STATE_SUSPENDED => DeviceState::Suspended,
            _ => DeviceState::Disconnected,
        }
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        let err = unsafe { (self.api.snd_pcm_prepare)(self.pcm) };
        self.check("snd_pcm_prepare", err as c_long).map(|_| ())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        let err = unsafe { (self.api.snd_pcm_start)(self.pcm) };
        self.check("snd_pcm_start", err as c_long).map(|_| ())
    }

    fn supports_delay_query(&self) -> bool {
        true
    }

    fn delay(&mut self) -> Result<usize, DeviceError> {
        let mut delay: snd_pcm_sframes_t = 0;
        let err = unsafe { (self.api.snd_pcm_delay)(self.pcm, &mut delay) };
        self.check("snd_pcm_delay", err as c_long)?;
        Ok(delay.max(0) as usize)
    }

    fn drain(&mut self) -> Result<(), DeviceError> {
        // 非阻塞模式下 drain 会立即返回 -EAGAIN，切换到阻塞模式等待播放完毕
        let err = unsafe { (self.api.snd_pcm_nonblock)(self.pcm, 0) };
        self.check("snd_pcm_nonblock", err as c_long)?;
        let err = unsafe { (self.api.snd_pcm_drain)(self.pcm) };
        self.check("snd_pcm_drain", err as c_long).map(|_| ())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.pcm.is_null() {
            return Ok(());
        }
        let err = unsafe { (self.api.snd_pcm_close)(self.pcm) };
        self.pcm = ptr::null_mut();
        log::debug!("ALSA device '{}' closed", self.name);
        self.check("snd_pcm_close", err as c_long).map(|_| ())
    }
}

impl PushDevice for AlsaDevice {
    fn writei(&mut self, samples: &[i16]) -> Result<usize, DeviceError> {
        let frames = samples.len() / self.frame_samples();
        let written = unsafe {
            (self.api.snd_pcm_writei)(
                self.pcm,
                samples.as_ptr() as *const c_void,
                frames as snd_pcm_uframes_t,
            )
        };
        self.check("snd_pcm_writei", written)
    }
}

impl MappedDevice for AlsaDevice {
    fn avail_update(&mut self) -> Result<usize, DeviceError> {
        let avail = unsafe { (self.api.snd_pcm_avail_update)(self.pcm) };
        self.check("snd_pcm_avail_update", avail)
    }

    fn mmap_begin(&mut self, frames: usize) -> Result<MmapArea, DeviceError> {
        let mut areas: *const snd_pcm_channel_area_t = ptr::null();
        let mut offset: snd_pcm_uframes_t = 0;
        let mut claimed = frames as snd_pcm_uframes_t;

        let err = unsafe {
            (self.api.snd_pcm_mmap_begin)(self.pcm, &mut areas, &mut offset, &mut claimed)
        };
        self.check("snd_pcm_mmap_begin", err as c_long)?;

        // 交织布局：所有声道共享第一个 area，step = 16 * channels 位
        let area = unsafe { &*areas };
        let expected_step = 16 * self.params.channels as c_uint;
        if area.step != expected_step || area.first % 16 != 0 {
            return Err(DeviceError::os(
                "snd_pcm_mmap_begin",
                -libc::EINVAL,
                format!("unexpected area layout (first {}, step {})", area.first, area.step),
            ));
        }
        self.mmap_base = unsafe { (area.addr as *mut i16).add(area.first as usize / 16) };

        Ok(MmapArea {
            offset: offset as usize,
            frames: claimed as usize,
        })
    }

    fn mmap_region(&mut self, area: &MmapArea) -> &mut [i16] {
        let ch = self.frame_samples();
        if self.mmap_base.is_null() || area.frames == 0 {
            return &mut [];
        }
        unsafe {
            std::slice::from_raw_parts_mut(self.mmap_base.add(area.offset * ch), area.frames * ch)
        }
    }

    fn mmap_commit(&mut self, area: MmapArea) -> Result<usize, DeviceError> {
        let committed = unsafe {
            (self.api.snd_pcm_mmap_commit)(
                self.pcm,
                area.offset as snd_pcm_uframes_t,
                area.frames as snd_pcm_uframes_t,
            )
        };
        self.mmap_base = ptr::null_mut();
        self.check("snd_pcm_mmap_commit", committed)
    }
}

impl Drop for AlsaDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close ALSA device '{}': {}", self.name, e);
        }
    }
}
