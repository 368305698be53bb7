/*
 * I2C (TWI) master/slave engine
 *
 * Status codes below are the real ATmega328 TWI hardware status byte
 * values (`twireg.h`); the state machine they drive is the one the
 * hardware ISR walks in the original AVR TWI driver, re-expressed as a
 * plain Rust `match` over an enum instead of a switch over raw bytes.
 *
 * One adapter per physical bus. `I2cClient` is the public handle board
 * code actually calls through (`master_xfer`, `slave_listen`,
 * `slave_respond`); it acquires the adapter's mutex, queues up to one
 * message of each of the four kinds, calls `flush` (for master work) or
 * `listen` (for slave work), and blocks on the appropriate wait queue
 * until the ISR completes, errors, or the wait times out.
 */

use crate::error::{BermudaError, BermudaResult, WaitResult};
use crate::sync::{Mutex as ResourceMutex, WaitQueue};
use spin::Mutex as SpinMutex;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Status {
    MasterStart = 0x08,
    MasterRepStart = 0x10,
    MtSlaAck = 0x18,
    MtSlaNack = 0x20,
    MtDataAck = 0x28,
    MtDataNack = 0x30,
    MasterArbLost = 0x38,
    MrSlaAck = 0x40,
    MrSlaNack = 0x48,
    MrDataAck = 0x50,
    MrDataNack = 0x58,
    SrSlawAck = 0x60,
    SrSlawArbLost = 0x68,
    SrGcAck = 0x70,
    SrGcArbLost = 0x78,
    SrSlawDataAck = 0x80,
    SrSlawDataNack = 0x88,
    SrGcDataAck = 0x90,
    SrGcDataNack = 0x98,
    SrStop = 0xA0,
    StSlarAck = 0xA8,
    StArbLost = 0xB0,
    StDataAck = 0xB8,
    StDataNack = 0xC0,
    StLastDataAck = 0xC8,
    BusError = 0x00,
}

impl Status {
    pub fn from_byte(b: u8) -> Option<Status> {
        use Status::*;
        Some(match b {
            0x08 => MasterStart,
            0x10 => MasterRepStart,
            0x18 => MtSlaAck,
            0x20 => MtSlaNack,
            0x28 => MtDataAck,
            0x30 => MtDataNack,
            0x38 => MasterArbLost,
            0x40 => MrSlaAck,
            0x48 => MrSlaNack,
            0x50 => MrDataAck,
            0x58 => MrDataNack,
            0x60 => SrSlawAck,
            0x68 => SrSlawArbLost,
            0x70 => SrGcAck,
            0x78 => SrGcArbLost,
            0x80 => SrSlawDataAck,
            0x88 => SrSlawDataNack,
            0x90 => SrGcDataAck,
            0x98 => SrGcDataNack,
            0xA0 => SrStop,
            0xA8 => StSlarAck,
            0xB0 => StArbLost,
            0xB8 => StDataAck,
            0xC0 => StDataNack,
            0xC8 => StLastDataAck,
            0x00 => BusError,
            _ => return None,
        })
    }
}

/// Default transfer timeout in ticks, mirroring `I2C_TMO` in the
/// original register header.
pub const DEFAULT_TIMEOUT_TICKS: u32 = 500;

pub const MAX_MSG_LEN: usize = 32;

#[derive(Clone, Copy)]
pub struct Message {
    pub addr: u8,
    pub len: usize,
    pub buf: [u8; MAX_MSG_LEN],
}

impl Message {
    pub fn new(addr: u8, data: &[u8]) -> Self {
        let mut buf = [0u8; MAX_MSG_LEN];
        let len = data.len().min(MAX_MSG_LEN);
        buf[..len].copy_from_slice(&data[..len]);
        Message { addr, len, buf }
    }

    pub fn empty(addr: u8, len: usize) -> Self {
        Message {
            addr,
            len: len.min(MAX_MSG_LEN),
            buf: [0u8; MAX_MSG_LEN],
        }
    }
}

/// Four message slots, matching `I2C_MSG_NUM` and the index constants in
/// the original register header: at most one pending message of each
/// kind at a time.
#[derive(Default)]
struct Slots {
    master_tx: Option<Message>,
    master_rx: Option<Message>,
    slave_rx: Option<Message>,
    slave_tx: Option<Message>,
}

impl Default for Message {
    fn default() -> Self {
        Message::empty(0, 0)
    }
}

/// Slave-rx completion callback: invoked directly from ISR context with
/// the adapter (so it can call `respond` to install a reply before the
/// master re-addresses for a read) and the bytes just received. Must not
/// block or allocate, the same discipline the rest of the ISR keeps to.
pub type SlaveCallback = fn(&I2cAdapter, &[u8]);

struct AdapterState {
    slots: Slots,
    index: usize,
    busy: bool,
    last_status: Option<Status>,
    master_capable: bool,
    slave_capable: bool,
    slave_callback: Option<SlaveCallback>,
}

pub struct I2cAdapter {
    state: SpinMutex<AdapterState>,
    mutex: ResourceMutex,
    master_wq: WaitQueue,
    slave_wq: WaitQueue,
}

impl I2cAdapter {
    pub const fn new(master_capable: bool, slave_capable: bool) -> Self {
        I2cAdapter {
            state: SpinMutex::new(AdapterState {
                slots: Slots {
                    master_tx: None,
                    master_rx: None,
                    slave_rx: None,
                    slave_tx: None,
                },
                index: 0,
                busy: false,
                last_status: None,
                master_capable,
                slave_capable,
                slave_callback: None,
            }),
            mutex: ResourceMutex::new(),
            master_wq: WaitQueue::new(),
            slave_wq: WaitQueue::new(),
        }
    }

    pub fn acquire(&self, timeout_ticks: u32) -> BermudaResult<()> {
        self.mutex.acquire(timeout_ticks)
    }

    pub fn release(&self) {
        self.mutex.release();
    }

    /// Queue a master write. Caller must hold the adapter mutex.
    pub fn queue_write(&self, msg: Message) {
        self.state.lock().slots.master_tx = Some(msg);
    }

    /// Queue a master read of `len` bytes. Caller must hold the adapter
    /// mutex.
    pub fn queue_read(&self, addr: u8, len: usize) {
        self.state.lock().slots.master_rx = Some(Message::empty(addr, len));
    }

    pub fn take_read_result(&self) -> Option<Message> {
        self.state.lock().slots.master_rx.take()
    }

    /// Install a slave-rx buffer and wait for a STOP condition (or
    /// timeout), per `listen(client, buffer, timeout)`.
    pub fn listen(&self, addr: u8, capacity: usize, timeout_ticks: u32) -> BermudaResult<Message> {
        {
            let mut st = self.state.lock();
            if !st.slave_capable {
                return Err(BermudaError::Unavailable);
            }
            st.slots.slave_rx = Some(Message::empty(addr, capacity));
            if !st.busy {
                hw::enable_slave_listen();
                st.busy = true;
            }
        }
        match self.slave_wq.wait(timeout_ticks) {
            WaitResult::Timeout => Err(BermudaError::Timeout),
            WaitResult::Ok => {
                let st = self.state.lock();
                match st.last_status {
                    Some(Status::BusError) => Err(BermudaError::BusError),
                    _ => {
                        drop(st);
                        self.state
                            .lock()
                            .slots
                            .slave_rx
                            .take()
                            .ok_or(BermudaError::BadState)
                    }
                }
            }
        }
    }

    /// Provide the response buffer for a slave-transmit phase after
    /// `listen` returns and the master re-addresses this node for a
    /// read.
    pub fn respond(&self, data: &[u8]) {
        self.state.lock().slots.slave_tx = Some(Message::new(0, data));
    }

    /// Arm (or clear) the callback the ISR invokes when a slave-rx
    /// transaction completes, per the I2C message's "wants-callback"
    /// feature bit.
    pub fn set_slave_callback(&self, callback: Option<SlaveCallback>) {
        self.state.lock().slave_callback = callback;
    }

    /// If idle with master work pending, issue START; if only slave work
    /// is pending, enable slave-listen; then block until the transfer
    /// completes, errors, or times out.
    pub fn flush(&self, timeout_ticks: u32) -> BermudaResult<()> {
        {
            let mut st = self.state.lock();
            if !st.busy {
                if st.slots.master_tx.is_some() || st.slots.master_rx.is_some() {
                    if !st.master_capable {
                        return Err(BermudaError::Unavailable);
                    }
                    st.index = 0;
                    st.busy = true;
                    hw::issue_start();
                } else if st.slots.slave_rx.is_some() {
                    st.busy = true;
                    hw::enable_slave_listen();
                } else {
                    return Ok(());
                }
            }
        }

        match self.master_wq.wait(timeout_ticks) {
            WaitResult::Timeout => Err(BermudaError::Timeout),
            WaitResult::Ok => {
                let status = self.state.lock().last_status;
                match status {
                    Some(Status::MtSlaNack) | Some(Status::MrSlaNack) => {
                        Err(BermudaError::BusNackAddress)
                    }
                    Some(Status::MtDataNack) => Err(BermudaError::BusNackData),
                    Some(Status::MasterArbLost) => Err(BermudaError::BusArbitrationLost),
                    Some(Status::BusError) => Err(BermudaError::BusError),
                    _ => Ok(()),
                }
            }
        }
    }

    /// ISR entry point: advance the state machine for one TWI interrupt,
    /// given the status byte latched in TWSR. Driven entirely by the
    /// status-byte table; never blocks, never allocates.
    pub fn isr(&self, status_byte: u8) {
        let status = match Status::from_byte(status_byte) {
            Some(s) => s,
            None => return,
        };
        let mut guard = self.state.lock();
        // A plain reborrow, not the guard itself: every arm below reads
        // and writes several sibling fields of `AdapterState` in the
        // same breath, which only borrow-checks predictably through a
        // single ordinary `&mut` — going through the guard's `DerefMut`
        // impl repeatedly per field access is best avoided entirely.
        let st: &mut AdapterState = &mut guard;
        st.last_status = Some(status);

        match status {
            Status::MasterStart | Status::MasterRepStart => {
                if let Some(tx) = &st.slots.master_tx {
                    hw::load_data((tx.addr << 1) | 0);
                } else if let Some(rx) = &st.slots.master_rx {
                    hw::load_data((rx.addr << 1) | 1);
                }
                hw::clear_start_ack();
            }
            Status::MtSlaAck | Status::MtDataAck => {
                let done = if let Some(tx) = &mut st.slots.master_tx {
                    if st.index < tx.len {
                        hw::load_data(tx.buf[st.index]);
                        st.index += 1;
                        hw::ack();
                        false
                    } else {
                        true
                    }
                } else {
                    true
                };
                if done {
                    if st.slots.master_rx.is_some() {
                        // The write phase is over; clear it so the
                        // MasterRepStart arm above loads SLA+R instead of
                        // reloading SLA+W on the repeated start.
                        st.slots.master_tx = None;
                        st.index = 0;
                        hw::issue_repeated_start();
                    } else {
                        hw::issue_stop();
                        st.busy = false;
                        drop(guard);
                        self.master_wq.signal_from_isr();
                        return;
                    }
                }
            }
            Status::MrSlaAck => {
                st.index = 0;
                let want_more = st
                    .slots
                    .master_rx
                    .as_ref()
                    .map(|m| m.len > 1)
                    .unwrap_or(false);
                if want_more {
                    hw::ack();
                } else {
                    hw::nack();
                }
            }
            Status::MrDataAck => {
                let idx = st.index;
                let len = st.slots.master_rx.as_ref().map(|rx| rx.len);
                if let Some(len) = len {
                    if idx < len {
                        let byte = hw::read_data();
                        if let Some(rx) = &mut st.slots.master_rx {
                            rx.buf[idx] = byte;
                        }
                        st.index += 1;
                    }
                    if st.index + 1 < len {
                        hw::ack();
                    } else {
                        hw::nack();
                    }
                }
            }
            Status::MrDataNack => {
                let idx = st.index;
                if let Some(rx) = &mut st.slots.master_rx {
                    if idx < rx.len {
                        rx.buf[idx] = hw::read_data();
                    }
                }
                hw::issue_stop();
                st.busy = false;
                drop(guard);
                self.master_wq.signal_from_isr();
            }
            Status::MtSlaNack | Status::MtDataNack | Status::MrSlaNack => {
                st.slots.master_tx = None;
                if status != Status::MrSlaNack {
                    st.slots.master_rx = None;
                }
                hw::issue_stop();
                st.busy = false;
                drop(guard);
                self.master_wq.signal_from_isr();
            }
            Status::MasterArbLost => {
                st.busy = false;
                let slave_pending = st.slots.slave_rx.is_some();
                drop(guard);
                if slave_pending {
                    hw::enable_slave_listen();
                }
                self.master_wq.signal_from_isr();
            }
            Status::SrSlawAck
            | Status::SrSlawArbLost
            | Status::SrGcAck
            | Status::SrGcArbLost => {
                st.index = 0;
                hw::ack();
            }
            Status::SrSlawDataAck | Status::SrGcDataAck => {
                let idx = st.index;
                if let Some(rx) = &mut st.slots.slave_rx {
                    if idx < rx.len {
                        rx.buf[idx] = hw::read_data();
                        st.index += 1;
                    }
                }
                hw::ack();
            }
            Status::SrSlawDataNack | Status::SrGcDataNack | Status::SrStop => {
                hw::block_scl();
                st.busy = false;
                // `slave_rx.len` was the requested buffer capacity;
                // shrink it to what was actually clocked in so callers
                // (and the slave callback below) see the real count.
                let received_len = st.index;
                if let Some(rx) = &mut st.slots.slave_rx {
                    rx.len = received_len.min(rx.len);
                }
                let received = st.slots.slave_rx;
                let callback = st.slave_callback;
                drop(guard);
                if let (Some(msg), Some(cb)) = (received, callback) {
                    cb(self, &msg.buf[..msg.len]);
                }
                self.slave_wq.signal_from_isr();
            }
            Status::StSlarAck | Status::StArbLost => {
                st.index = 0;
                let byte = st
                    .slots
                    .slave_tx
                    .as_ref()
                    .and_then(|tx| if tx.len > 0 { tx.buf.get(0).copied() } else { None })
                    .unwrap_or(0xFF);
                hw::load_data(byte);
                hw::ack();
            }
            Status::StDataAck => {
                let idx = st.index + 1;
                st.index = idx;
                let byte = st
                    .slots
                    .slave_tx
                    .as_ref()
                    .and_then(|tx| if idx < tx.len { tx.buf.get(idx).copied() } else { None });
                match byte {
                    Some(b) => {
                        hw::load_data(b);
                        hw::ack();
                    }
                    None => hw::nack(),
                }
            }
            Status::StDataNack | Status::StLastDataAck => {
                st.busy = false;
                let master_pending = st.slots.master_tx.is_some() || st.slots.master_rx.is_some();
                drop(guard);
                self.slave_wq.signal_from_isr();
                if master_pending {
                    hw::issue_start();
                }
            }
            Status::BusError => {
                st.slots = Slots {
                    master_tx: None,
                    master_rx: None,
                    slave_rx: None,
                    slave_tx: None,
                };
                st.busy = false;
                hw::reset_hardware();
                drop(guard);
                self.master_wq.signal_from_isr();
                self.slave_wq.signal_from_isr();
            }
        }
    }
}

/// A peer on the bus: its slave address, preferred bus frequency, and an
/// optional slave-rx completion callback. The bus clock is shared by
/// every client on the adapter (unlike SPI, I2C has no per-transfer
/// rate), so `freq` only documents what the client expects to be
/// programmed at adapter init, rather than triggering a reprogram here.
#[derive(Clone, Copy)]
pub struct I2cClient {
    pub addr: u8,
    pub freq: u32,
    pub callback: Option<SlaveCallback>,
}

pub fn client_init(addr: u8, freq: u32, callback: Option<SlaveCallback>) -> I2cClient {
    I2cClient { addr, freq, callback }
}

impl I2cAdapter {
    /// `master_xfer(client, tx, tx_len, rx, rx_len, tmo)`: write `tx` (if
    /// non-empty), then read into `rx` (if non-empty) via a repeated
    /// start when both are queued together. Returns the NACK/arbitration
    /// error set from `flush` directly; `rx` is filled in place.
    pub fn master_xfer(
        &self,
        client: &I2cClient,
        tx: &[u8],
        rx: &mut [u8],
        timeout_ticks: u32,
    ) -> BermudaResult<()> {
        self.acquire(timeout_ticks)?;
        if !tx.is_empty() {
            self.queue_write(Message::new(client.addr, tx));
        }
        if !rx.is_empty() {
            self.queue_read(client.addr, rx.len());
        }
        let result = self.flush(timeout_ticks);
        if result.is_ok() && !rx.is_empty() {
            if let Some(msg) = self.take_read_result() {
                let n = msg.len.min(rx.len());
                rx[..n].copy_from_slice(&msg.buf[..n]);
            }
        }
        self.release();
        result
    }

    /// `slave_listen(client, rx, rx_len, tmo) -> bytes_received|Timeout`:
    /// arm a slave-rx buffer at `client.addr` and block until a STOP
    /// closes the transaction. If `client` carries a callback, it fires
    /// from ISR context before this call wakes, so a response installed
    /// by the callback via `slave_respond` is already in place by the
    /// time this returns.
    pub fn slave_listen(
        &self,
        client: &I2cClient,
        rx: &mut [u8],
        timeout_ticks: u32,
    ) -> BermudaResult<usize> {
        self.acquire(timeout_ticks)?;
        if client.callback.is_some() {
            self.set_slave_callback(client.callback);
        }
        let result = self.listen(client.addr, rx.len(), timeout_ticks);
        self.release();
        result.map(|msg| {
            let n = msg.len.min(rx.len());
            rx[..n].copy_from_slice(&msg.buf[..n]);
            n
        })
    }

    /// `slave_respond(client, tx, tx_len, tmo)`: install the slave-tx
    /// buffer for the transmit phase that follows a completed slave-rx.
    /// Synchronous — there is nothing to block on, the buffer install is
    /// all `respond` ever did — but the timeout parameter is kept to
    /// match the named operation's signature.
    pub fn slave_respond(
        &self,
        _client: &I2cClient,
        tx: &[u8],
        _timeout_ticks: u32,
    ) -> BermudaResult<()> {
        self.respond(tx);
        Ok(())
    }
}

/// Bitrate/prescaler calculation, grounded in `atmega_i2c_calc_twbr`:
/// `TWBR = ((F_CPU / scl_freq) - 16) / (2 * prescaler)`.
pub fn calc_twbr(f_cpu: u32, scl_freq: u32, prescaler: u32) -> u8 {
    let divisor = f_cpu / scl_freq;
    let twbr = divisor.saturating_sub(16) / (2 * prescaler);
    twbr.min(u8::MAX as u32) as u8
}

/// Hardware register access, isolated behind free functions so the state
/// machine above is testable on the host: in `#[cfg(test)]` builds these
/// are no-ops recording nothing, matching the `Hosted` arch backend's
/// "bookkeeping only" philosophy.
mod hw {
    #[cfg(not(test))]
    mod avr_regs {
        // Real register pokes would live here on the AVR target
        // (TWCR/TWDR bit twiddling per twireg.h); omitted since this
        // crate only specifies the portable state machine.
    }

    pub fn issue_start() {}
    pub fn issue_repeated_start() {}
    pub fn issue_stop() {}
    pub fn clear_start_ack() {}
    pub fn load_data(_byte: u8) {}
    pub fn read_data() -> u8 {
        0
    }
    pub fn ack() {}
    pub fn nack() {}
    pub fn enable_slave_listen() {}
    pub fn block_scl() {}
    pub fn reset_hardware() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calc_twbr_matches_known_value() {
        // 16 MHz clock, 100 kHz SCL, prescaler 1: TWBR = (160 - 16) / 2 = 72.
        assert_eq!(calc_twbr(16_000_000, 100_000, 1), 72);
    }

    #[test]
    fn status_from_byte_round_trips_known_codes() {
        assert_eq!(Status::from_byte(0x08), Some(Status::MasterStart));
        assert_eq!(Status::from_byte(0xC8), Some(Status::StLastDataAck));
        assert_eq!(Status::from_byte(0xFF), None);
    }

    #[test]
    fn master_write_completes_and_signals() {
        let adapter = I2cAdapter::new(true, false);
        adapter.queue_write(Message::new(0x50, &[1, 2, 3]));
        adapter.isr(0x08); // START
        adapter.isr(0x18); // SLA+W ACK
        adapter.isr(0x28); // data ACK
        adapter.isr(0x28); // data ACK
        adapter.isr(0x28); // data ACK -> done, STOP issued
        assert!(!adapter.state.lock().busy);
    }

    #[test]
    fn address_nack_is_fatal_and_clears_busy() {
        let adapter = I2cAdapter::new(true, false);
        adapter.queue_write(Message::new(0x50, &[1]));
        adapter.isr(0x08);
        adapter.isr(0x20); // SLA NACK
        assert!(!adapter.state.lock().busy);
        assert!(adapter.state.lock().slots.master_tx.is_none());
    }

    #[test]
    fn bus_error_clears_every_slot() {
        let adapter = I2cAdapter::new(true, true);
        adapter.queue_write(Message::new(0x50, &[1]));
        adapter.isr(0x00);
        let st = adapter.state.lock();
        assert!(st.slots.master_tx.is_none());
        assert!(!st.busy);
    }

    #[test]
    fn write_then_read_repeated_start_switches_to_receive() {
        let adapter = I2cAdapter::new(true, false);
        adapter.queue_write(Message::new(0x50, &[0x01]));
        adapter.queue_read(0x50, 1);
        adapter.isr(0x08); // START -> master_tx present, loads SLA+W
        adapter.isr(0x18); // SLA+W ACK -> sends the one data byte
        adapter.isr(0x28); // data ACK -> tx done, master_rx pending: repeated start

        // The write phase must be cleared so the repeated START below
        // loads SLA+R, not SLA+W again.
        assert!(adapter.state.lock().slots.master_tx.is_none());
        assert!(adapter.state.lock().slots.master_rx.is_some());

        adapter.isr(0x10); // MasterRepStart
        adapter.isr(0x40); // MR SLA ACK (one byte wanted -> NACK next)
        adapter.isr(0x58); // MR DATA NACK -> stores last byte, STOP, signal
        assert!(!adapter.state.lock().busy);
    }

    static SLAVE_CALLBACK_FIRED: core::sync::atomic::AtomicUsize =
        core::sync::atomic::AtomicUsize::new(0);

    fn test_slave_callback(adapter: &I2cAdapter, data: &[u8]) {
        SLAVE_CALLBACK_FIRED.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        // `hw::read_data` is a no-op stub returning 0 in host tests, so the
        // one byte captured below reads back as 0x00 rather than whatever
        // a real master wrote.
        assert_eq!(data, &[0x00]);
        adapter.respond(&[0xBB]);
    }

    #[test]
    fn slave_callback_fires_on_completion_and_installs_response() {
        let adapter = I2cAdapter::new(false, true);
        adapter.set_slave_callback(Some(test_slave_callback));
        adapter.state.lock().slots.slave_rx = Some(Message::empty(0x56, 4));

        let before = SLAVE_CALLBACK_FIRED.load(core::sync::atomic::Ordering::Relaxed);
        adapter.isr(0x60); // SR SLAW ACK
        adapter.isr(0x80); // SR SLAW DATA ACK -> stores one byte
        adapter.isr(0xA0); // SR STOP -> callback fires, then signal

        assert_eq!(
            SLAVE_CALLBACK_FIRED.load(core::sync::atomic::Ordering::Relaxed),
            before + 1
        );
        let st = adapter.state.lock();
        assert_eq!(st.slots.slave_tx.as_ref().unwrap().buf[0], 0xBB);
    }
}
