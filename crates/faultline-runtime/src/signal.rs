//! Signal bridge: translate fatal memory-access signals into faults.
//!
//! Installing the bridge is a one-time, explicit, opt-in step. Once
//! installed, SIGSEGV and SIGBUS raised while a protected block is armed on
//! the current thread are delivered to that block as the fatal-memory-access
//! fault instead of killing the process. With no armed block the process dies
//! with the usual signal status, because continuing after uncontained memory
//! corruption would hide the corruption.
//!
//! # Safety design
//!
//! - Per-thread state is reached through `pthread_getspecific` (on the POSIX
//!   async-signal-safe list); Rust's `thread_local!` is not safe to touch
//!   from a handler.
//! - Recovery uses `sigsetjmp`/`siglongjmp`, the POSIX-correct pair for
//!   signal contexts. The jump buffer lives in the stack frame of the block
//!   that armed it.
//! - The handler performs no allocation, locking, or I/O.
//!
//! The jump abandons every frame between the faulting instruction and the
//! armed block without running destructors, and the program state after a
//! genuine memory fault is not guaranteed consistent. Callers accept both
//! when they install the bridge.

#[cfg(unix)]
mod platform {
    use std::ptr;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
    use std::sync::OnceLock;

    use tracing::debug;

    use crate::error::BridgeError;
    use crate::fault::{Fault, FaultCode};

    /// `sigjmp_buf` save area. The libc crate does not expose `sigjmp_buf`
    /// as a usable type, so the buffer is over-allocated raw storage: on
    /// x86_64 glibc the real structure is 200 bytes.
    #[repr(C, align(16))]
    pub(crate) struct JumpBuf {
        #[cfg(target_arch = "x86_64")]
        _buf: [u8; 256],
        #[cfg(not(target_arch = "x86_64"))]
        _buf: [u8; 512],
    }

    impl JumpBuf {
        pub(crate) const fn zeroed() -> Self {
            Self {
                _buf: [0u8; {
                    #[cfg(target_arch = "x86_64")]
                    {
                        256
                    }
                    #[cfg(not(target_arch = "x86_64"))]
                    {
                        512
                    }
                }],
            }
        }
    }

    extern "C" {
        // On glibc sigsetjmp is a macro over __sigsetjmp; on macOS it is the
        // actual symbol.
        #[cfg_attr(target_os = "linux", link_name = "__sigsetjmp")]
        pub(crate) fn sigsetjmp(env: *mut JumpBuf, savemask: libc::c_int) -> libc::c_int;
        fn siglongjmp(env: *mut JumpBuf, val: libc::c_int) -> !;
    }

    /// Per-thread bridge state.
    ///
    /// `top` points at the jump buffer of the innermost armed block; the
    /// chain of outer buffers is kept implicitly, each block restoring its
    /// predecessor on disarm. All fields are written on the normal path and
    /// read by the handler on the same thread.
    struct BridgeCtx {
        top: *mut JumpBuf,
        /// Whether `top` holds a valid save point. Set only after sigsetjmp
        /// has returned on the normal path.
        armed: AtomicBool,
        /// Re-entrancy guard: a second crash while recovering means the
        /// recovery path itself is broken.
        in_recovery: AtomicBool,
        /// Signal number recorded by the handler.
        signal: AtomicI32,
        /// Fault address from `siginfo_t`, recorded by the handler.
        fault_addr: usize,
    }

    impl BridgeCtx {
        fn new_boxed() -> Box<Self> {
            Box::new(Self {
                top: ptr::null_mut(),
                armed: AtomicBool::new(false),
                in_recovery: AtomicBool::new(false),
                signal: AtomicI32::new(0),
                fault_addr: 0,
            })
        }
    }

    static INSTALLED: OnceLock<()> = OnceLock::new();
    static BRIDGE_KEY: OnceLock<libc::pthread_key_t> = OnceLock::new();

    /// Destructor called by pthreads when a thread exits.
    ///
    /// # Safety
    ///
    /// `ptr` was produced by `Box::into_raw` in `ctx_or_init`.
    unsafe extern "C" fn ctx_dtor(ptr: *mut libc::c_void) {
        if !ptr.is_null() {
            drop(unsafe { Box::from_raw(ptr.cast::<BridgeCtx>()) });
        }
    }

    /// Current thread's bridge state, or null before the first armed block.
    ///
    /// Async-signal-safe: `pthread_getspecific` is on the POSIX list.
    #[inline]
    unsafe fn current_ctx() -> *mut BridgeCtx {
        let Some(&key) = BRIDGE_KEY.get() else {
            return ptr::null_mut();
        };
        unsafe { libc::pthread_getspecific(key) }.cast::<BridgeCtx>()
    }

    /// Current thread's bridge state, allocating it on first use. Returns
    /// null when the key is missing or thread-local storage is exhausted;
    /// the bridge then simply stays disarmed on this thread.
    fn ctx_or_init() -> *mut BridgeCtx {
        let Some(&key) = BRIDGE_KEY.get() else {
            return ptr::null_mut();
        };
        // SAFETY: key was created in install.
        let existing = unsafe { libc::pthread_getspecific(key) };
        if !existing.is_null() {
            return existing.cast();
        }
        let ctx = Box::into_raw(BridgeCtx::new_boxed());
        // SAFETY: key is valid and ctx is a live heap pointer.
        if unsafe { libc::pthread_setspecific(key, ctx.cast()) } != 0 {
            // SAFETY: ctx came from Box::into_raw above and was never shared.
            drop(unsafe { Box::from_raw(ctx) });
            return ptr::null_mut();
        }
        ctx
    }

    /// Handler for SIGSEGV/SIGBUS.
    ///
    /// # Async-signal-safety
    ///
    /// Only calls `pthread_getspecific`, atomic loads/stores, `siglongjmp`,
    /// and `_exit`, all async-signal-safe per POSIX.
    extern "C" fn bridge_signal_handler(
        sig: libc::c_int,
        info: *mut libc::siginfo_t,
        _ucontext: *mut libc::c_void,
    ) {
        // SAFETY: pthread_getspecific is async-signal-safe.
        let ctx = unsafe { current_ctx() };
        if ctx.is_null() {
            // No bridge state on this thread: die as the process would
            // without the runtime.
            // SAFETY: _exit is async-signal-safe.
            unsafe { libc::_exit(128 + sig) };
        }

        // SAFETY: ctx is valid; it was created on this thread and pthreads
        // frees it only at thread exit.
        let ctx = unsafe { &mut *ctx };

        if ctx.in_recovery.swap(true, Ordering::Acquire) {
            // SAFETY: _exit is async-signal-safe.
            unsafe { libc::_exit(128 + sig) };
        }

        if !ctx.armed.load(Ordering::Acquire) || ctx.top.is_null() {
            // No protected block armed: not our crash to absorb.
            // SAFETY: _exit is async-signal-safe.
            unsafe { libc::_exit(128 + sig) };
        }

        ctx.signal.store(sig, Ordering::Release);
        if !info.is_null() {
            // SAFETY: info is valid in signal context. si_addr is a method
            // on Linux and a field elsewhere.
            #[cfg(target_os = "linux")]
            {
                ctx.fault_addr = unsafe { (*info).si_addr() } as usize;
            }
            #[cfg(not(target_os = "linux"))]
            {
                ctx.fault_addr = unsafe { (*info).si_addr } as usize;
            }
        }

        // Invalidate the save point so a second fault cannot reuse it.
        ctx.armed.store(false, Ordering::Release);

        // SAFETY: top was set by the armed block whose frame is still live
        // on this thread's stack; siglongjmp restores the saved signal mask.
        unsafe { siglongjmp(ctx.top, 1) };
    }

    pub(crate) fn install() -> Result<(), BridgeError> {
        if INSTALLED.get().is_some() {
            return Err(BridgeError::AlreadyInstalled);
        }

        if BRIDGE_KEY.get().is_none() {
            let mut key: libc::pthread_key_t = 0;
            // SAFETY: key is a valid out-pointer and ctx_dtor a valid
            // destructor.
            let ret = unsafe { libc::pthread_key_create(&mut key, Some(ctx_dtor)) };
            if ret != 0 {
                return Err(BridgeError::ThreadState(ret));
            }
            let _ = BRIDGE_KEY.set(key);
        }

        for sig in [libc::SIGSEGV, libc::SIGBUS] {
            // SAFETY: action is fully initialized before the sigaction call.
            unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_flags = libc::SA_SIGINFO;
                // Block everything else while the handler runs.
                libc::sigfillset(&mut action.sa_mask);
                action.sa_sigaction = bridge_signal_handler
                    as extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void)
                    as usize;
                if libc::sigaction(sig, &action, ptr::null_mut()) != 0 {
                    return Err(BridgeError::HandlerRegistration(sig));
                }
            }
        }

        let _ = INSTALLED.set(());
        debug!("signal bridge installed for SIGSEGV and SIGBUS");
        Ok(())
    }

    pub(crate) fn bridge_installed() -> bool {
        INSTALLED.get().is_some()
    }

    /// Make `buf` the innermost save point for this thread. Returns the
    /// previous top so the block can restore it on disarm. The buffer is not
    /// considered valid until [`mark_armed`] runs after sigsetjmp.
    pub(crate) fn arm(buf: &mut JumpBuf) -> *mut JumpBuf {
        let ctx = ctx_or_init();
        if ctx.is_null() {
            return ptr::null_mut();
        }
        // SAFETY: ctx belongs to this thread.
        let ctx = unsafe { &mut *ctx };
        let previous = ctx.top;
        ctx.top = buf;
        ctx.armed.store(false, Ordering::Release);
        ctx.in_recovery.store(false, Ordering::Release);
        previous
    }

    /// Mark the current save point valid. Called after sigsetjmp has
    /// returned 0 in the block's own frame.
    pub(crate) fn mark_armed() {
        // SAFETY: same thread that ran arm.
        let ctx = unsafe { current_ctx() };
        if ctx.is_null() {
            return;
        }
        // SAFETY: ctx belongs to this thread.
        unsafe { &*ctx }.armed.store(true, Ordering::Release);
    }

    /// Restore the enclosing block's save point (or none). An outer buffer
    /// is valid again the moment it becomes top: its sigsetjmp already ran.
    pub(crate) fn disarm(previous: *mut JumpBuf) {
        // SAFETY: same thread that ran arm.
        let ctx = unsafe { current_ctx() };
        if ctx.is_null() {
            return;
        }
        // SAFETY: ctx belongs to this thread.
        let ctx = unsafe { &mut *ctx };
        ctx.top = previous;
        ctx.armed.store(!previous.is_null(), Ordering::Release);
    }

    /// Build the fault describing the crash the handler just delivered.
    /// Called in the armed block's frame, after the jump; allocation is fine
    /// again here.
    pub(crate) fn crash_fault() -> Fault {
        // SAFETY: same thread the handler jumped on.
        let ctx = unsafe { current_ctx() };
        if ctx.is_null() {
            return Fault {
                code: FaultCode::FATAL_MEMORY_ACCESS,
                diagnostic: None,
            };
        }
        // SAFETY: ctx belongs to this thread.
        let ctx = unsafe { &mut *ctx };
        let signo = ctx.signal.load(Ordering::Acquire);
        let addr = ctx.fault_addr;
        ctx.in_recovery.store(false, Ordering::Release);
        let name = match signo {
            libc::SIGSEGV => "SIGSEGV",
            libc::SIGBUS => "SIGBUS",
            _ => "signal",
        };
        Fault {
            code: FaultCode::FATAL_MEMORY_ACCESS,
            diagnostic: Some(format!("{name} at address {addr:#x}")),
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use crate::error::BridgeError;

    pub(crate) fn install() -> Result<(), BridgeError> {
        Err(BridgeError::Unsupported)
    }
}

#[cfg(unix)]
pub(crate) use platform::{arm, bridge_installed, crash_fault, disarm, mark_armed, sigsetjmp, JumpBuf};

use crate::error::BridgeError;

/// Install the bridge that turns SIGSEGV/SIGBUS into
/// [`FaultCode::FATAL_MEMORY_ACCESS`](crate::FaultCode::FATAL_MEMORY_ACCESS)
/// inside protected blocks.
///
/// Explicit and at most once per process, before the protected regions that
/// should benefit. Interception of this class of fault is inherently unsafe
/// when execution state is corrupted; installing the bridge is how a caller
/// accepts that risk. Unsupported off Unix.
pub fn install_signal_bridge() -> Result<(), BridgeError> {
    platform::install()
}
