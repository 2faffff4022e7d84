use embassy_futures::yield_now;
use smoltcp::wire::EthernetAddress;

use crate::{
    buffer::NetBuffer,
    config::TxPayloadMode,
    descriptor::{BssType, InterfaceHeader, TxPd, ETH_HEADER_LEN, INTF_HEADER_LEN, INTF_TYPE_DATA},
    interface::InterfaceBinding,
    qos::{classify, is_control_plane, receiver_address, AccessCategory},
};

/// Why no output buffer could be acquired from a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AcquireError {
    /// The queue is momentarily out of buffers.
    NoBuffer,
    /// The firmware paused the queue.
    Paused,
}
/// The firmware response to a submitted output buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubmitError {
    NoMemory,
    Busy,
    Failed,
}
/// An error returned to the stack, when a frame couldn't be sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxError {
    /// Buffers or queue space were exhausted. The stack may try again later.
    Memory,
    /// The firmware stayed busy or the queue stayed paused.
    Timeout,
    /// The frame doesn't fit into an output buffer.
    Oversized,
    /// No interface is bound to the role.
    InterfaceNotBound,
}
pub type TxResult<T> = Result<T, TxError>;

/// The transmit side of the firmware.
pub trait TxFirmware {
    /// Offer a control plane frame to the bypass queue.
    ///
    /// If the queue doesn't take the frame, it's returned.
    fn offer_bypass(&self, role: BssType, frame: NetBuffer) -> Result<(), NetBuffer>;
    /// Acquire an output buffer from the queue of the access category.
    fn acquire_outbuf(
        &self,
        role: BssType,
        access_category: AccessCategory,
        receiver: EthernetAddress,
    ) -> Result<OutBuffer, AcquireError>;
    /// Hand a composed output buffer to the firmware.
    fn submit(&self, role: BssType, buffer: OutBuffer) -> Result<(), SubmitError>;
    /// Ask the firmware to drain its queues.
    fn notify_tx_pending(&self);
    /// Account a frame, which was dropped after retrying.
    fn drop_retried(&self, role: BssType);
}

/// A composition buffer handed out by an output queue.
///
/// After composition it holds the interface header, the [TxPd] and the Ethernet frame. In
/// zero-copy mode, only the Ethernet header is copied and the rest of the frame is kept alive
/// by the buffer, until the firmware gathers it with [OutBuffer::gather_into] and drops the
/// buffer.
#[derive(Debug)]
pub struct OutBuffer {
    access_category: AccessCategory,
    composed: NetBuffer,
    referenced: Option<NetBuffer>,
}
impl OutBuffer {
    /// Wrap a firmware buffer. Its capacity limits the size of the composed frame.
    pub fn new(buffer: NetBuffer, access_category: AccessCategory) -> Self {
        Self {
            access_category,
            composed: buffer,
            referenced: None,
        }
    }
    pub fn access_category(&self) -> AccessCategory {
        self.access_category
    }
    /// The bytes copied into the buffer.
    pub fn composed(&self) -> &[u8] {
        self.composed.payload()
    }
    /// The part of the frame, that is referenced instead of copied.
    pub fn referenced(&self) -> Option<&[u8]> {
        self.referenced.as_ref().map(NetBuffer::payload)
    }
    /// The total length handed to the firmware.
    pub fn len(&self) -> usize {
        self.composed.len() + self.referenced().map_or(0, <[u8]>::len)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Copy the complete output into `dst`, like the DMA engine does at submission.
    ///
    /// Returns the amount of bytes written, or [None] if `dst` is too small.
    pub fn gather_into(&self, dst: &mut [u8]) -> Option<usize> {
        let dst = dst.get_mut(..self.len())?;
        let (headers, rest) = dst.split_at_mut(self.composed.len());
        headers.copy_from_slice(self.composed.payload());
        if let Some(referenced) = self.referenced() {
            rest.copy_from_slice(referenced);
        }
        Some(self.len())
    }
    fn compose(
        &mut self,
        role: BssType,
        tid: u8,
        mut frame: NetBuffer,
        mode: TxPayloadMode,
    ) -> TxResult<()> {
        let total_length = INTF_HEADER_LEN + TxPd::LEN + frame.len();
        let copied_length = match mode {
            TxPayloadMode::Copy => total_length,
            TxPayloadMode::ZeroCopy => {
                INTF_HEADER_LEN + TxPd::LEN + frame.len().min(ETH_HEADER_LEN)
            }
        };
        if copied_length > self.composed.capacity() {
            return Err(TxError::Oversized);
        }
        let total_length = u16::try_from(total_length).map_err(|_| TxError::Oversized)?;
        let mut prefix = [0u8; INTF_HEADER_LEN + TxPd::LEN];
        InterfaceHeader::new()
            .with_length(total_length)
            .with_kind(INTF_TYPE_DATA)
            .write(&mut prefix);
        TxPd::new(role, frame.len() as u16, tid).write(&mut prefix[INTF_HEADER_LEN..]);

        // Capacity was checked above, so neither of these can fail.
        self.composed.fill(&prefix);
        match mode {
            TxPayloadMode::Copy => {
                self.composed.append(frame.payload());
            }
            TxPayloadMode::ZeroCopy => {
                let header_len = frame.len().min(ETH_HEADER_LEN);
                self.composed.append(&frame.payload()[..header_len]);
                frame.advance(header_len);
                self.referenced = Some(frame);
            }
        }
        trace!(
            "Composed {} bytes for {:?}, TID {}.",
            total_length,
            self.access_category,
            tid
        );
        Ok(())
    }
}

/// How hard to try acquiring an output buffer.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RetryPolicy {
    /// Attempts in addition to the first one.
    pub budget: usize,
    /// Yield to other tasks, if the queue is paused.
    pub yield_on_pause: bool,
}

async fn acquire<F: TxFirmware + ?Sized>(
    firmware: &F,
    role: BssType,
    access_category: AccessCategory,
    receiver: EthernetAddress,
    policy: RetryPolicy,
) -> Result<OutBuffer, AcquireError> {
    let mut retries = 0;
    loop {
        let err = match firmware.acquire_outbuf(role, access_category, receiver) {
            Ok(buffer) => return Ok(buffer),
            Err(err) => err,
        };
        if retries == policy.budget {
            return Err(err);
        }
        retries += 1;
        debug!(
            "Queue {:?} unavailable ({:?}), retry {}.",
            access_category, err, retries
        );
        firmware.notify_tx_pending();
        if err == AcquireError::Paused && policy.yield_on_pause {
            yield_now().await;
        }
    }
}

/// Send a frame through the firmware and account the outcome on the interface.
pub(crate) async fn transmit<F: TxFirmware + ?Sized>(
    firmware: &F,
    binding: &InterfaceBinding<'_>,
    mode: TxPayloadMode,
    policy: RetryPolicy,
    mut frame: NetBuffer,
) -> TxResult<()> {
    let role = binding.role();
    let counters = binding.counters();
    let (access_category, tid) = classify(frame.payload());
    let receiver = receiver_address(frame.payload());

    if is_control_plane(frame.payload()) {
        match firmware.offer_bypass(role, frame) {
            Ok(()) => {
                trace!("Control plane frame took the bypass queue.");
                counters.tx_packet();
                return Ok(());
            }
            Err(returned) => frame = returned,
        }
    }

    let mut buffer = match acquire(firmware, role, access_category, receiver, policy).await {
        Ok(buffer) => buffer,
        Err(err) => {
            firmware.drop_retried(role);
            counters.tx_overrun();
            debug!("Giving up on queue {:?}.", access_category);
            return Err(match err {
                AcquireError::Paused => TxError::Timeout,
                _ => TxError::Memory,
            });
        }
    };
    if let Err(err) = buffer.compose(role, tid, frame, mode) {
        counters.tx_error();
        return Err(err);
    }
    match firmware.submit(role, buffer) {
        Ok(()) => {
            counters.tx_packet();
            Ok(())
        }
        Err(err) => {
            counters.tx_error();
            debug!("Submission failed: {:?}.", err);
            Err(match err {
                SubmitError::Busy => TxError::Timeout,
                _ => TxError::Memory,
            })
        }
    }
}
