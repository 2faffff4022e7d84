/// How the payload of an outbound frame reaches the firmware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxPayloadMode {
    /// The frame is copied into the output buffer.
    #[default]
    Copy,
    /// Only the headers are copied. The frame is kept alive by the output buffer, until the
    /// firmware copies it during submission.
    ZeroCopy,
}

/// Every management subtype passes to the sink.
pub const MGMT_PASSTHROUGH_ALL: u16 = 0xffff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Runtime parameters of an adapter.
pub struct NetifConfig {
    /// Additional attempts at acquiring an output buffer for frames sent by the stack.
    pub tx_retry_budget: usize,
    /// Additional attempts at acquiring an output buffer for forwarded frames.
    pub ap_forward_retry_budget: usize,
    /// Capacity of the buffers attached to RX ring slots.
    ///
    /// This has to fit the MTU plus the firmware headers.
    pub rx_buffer_size: usize,
    pub tx_payload_mode: TxPayloadMode,
    /// Drop received frames carrying the address of the receiving interface as source.
    pub filter_own_source: bool,
    /// Extra attempts at handing a frame to the stack.
    pub stack_input_retries: usize,
    /// Bit `n` lets management frames of subtype `n` through to the sink.
    ///
    /// Action frames always pass.
    pub mgmt_passthrough_mask: u16,
}
impl Default for NetifConfig {
    fn default() -> Self {
        Self {
            tx_retry_budget: 3,
            ap_forward_retry_budget: 3,
            rx_buffer_size: 1600,
            tx_payload_mode: TxPayloadMode::Copy,
            filter_own_source: true,
            stack_input_retries: 1,
            mgmt_passthrough_mask: MGMT_PASSTHROUGH_ALL,
        }
    }
}
