//! # Error codes
//!
//! Every fallible operation of the connection engine returns [`Error`].
//! Configuration and validation errors are reported synchronously and leave
//! the engine fully reconfigurable. Errors detected inside interrupt context
//! are never propagated through a call stack: they increment the connection
//! counters and, when visible to the application (RX overrun, prolonged
//! disconnection), are surfaced as an [`Event`](crate::mac::Event) through
//! the callback queue.

/// Result alias used through the whole crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Connection engine error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The engine is not initialized
    NotInitialized,
    /// The provided memory arena is too small for the requested configuration
    NotEnoughMemory,
    /// Fast sync and dual radio are enabled but are incompatible
    FastSyncWithDualRadio,
    /// The configured PAN ID is invalid
    PanId,
    /// The configured network role is invalid
    NetworkRole,
    /// The configured sleep level is invalid
    SleepLevel,
    /// The configured IRQ polarity is invalid
    IrqPolarity,
    /// The configured SPI mode is invalid
    SpiMode,
    /// The configured modulation is invalid
    Modulation,
    /// The configured FEC ratio is invalid
    FecRatio,
    /// The configured CCA fail action is invalid
    CcaFailAction,
    /// The configured CCA parameters are invalid
    CcaInvalidParameters,
    /// The configured local address is invalid
    LocalAddress,
    /// The configured source address is invalid
    SourceAddress,
    /// The configured destination address is invalid
    DestinationAddress,
    /// None of the connection's addresses match the local device's address
    ConnectionAddress,
    /// ARQ is enabled while ACK is not
    ArqWithAckDisabled,
    /// Credit flow control is enabled while ACK is not
    CreditFlowCtrlWithAckDisabled,
    /// Link throttling is enabled on an RX connection
    ThrottlingOnRxConnection,
    /// Link throttling is not enabled on this connection
    ThrottlingNotSupported,
    /// Payload memory allocation is not enabled on an RX connection
    NoPayloadMemAllocOnRxConnection,
    /// The configured TX pulse count is invalid
    TxPulseCount,
    /// The configured TX pulse width is invalid
    TxPulseWidth,
    /// The configured TX pulse gain is invalid
    TxPulseGain,
    /// The configured RX pulse count is invalid
    RxPulseCount,
    /// The pulse configuration is not achievable at the 27.30 MHz chip rate
    InvalidPulseConfig27M,
    /// There is no more payload buffer available from the queue
    NoBufferAvailable,
    /// A channel is added on a connection using only auto-reply timeslots
    AddChannelOnInvalidConnection,
    /// A connection has no channel configured
    NoChannelInit,
    /// Internal engine error, reserved for unreachable paths
    Internal,
    /// The engine is already connected
    AlreadyConnected,
    /// The engine is not connected
    NotConnected,
    /// The engine failed to disconnect within the timeout value
    DisconnectTimeout,
    /// The payload size exceeds the maximum for the connection configuration
    PayloadTooBig,
    /// Dual radio is used but the second radio was never initialized
    SecondRadioNotInit,
    /// The radio calibration data is missing
    CalibrationMissing,
    /// The requested radio does not exist on this node
    RadioNotFound,
    /// Direct receive is not available when fragmentation is enabled,
    /// use `receive_to_buffer` instead
    FragmentationNotSupported,
    /// The configured output driver impedance is invalid
    OutImped,
    /// Send was called on a connection that can only receive
    SendOnRxConn,
    /// Zero was given as timeslot sequence length
    ZeroTimeslotSeqLen,
    /// Zero was given as channel sequence length
    ZeroChanSeqLen,
    /// Minimum queue size requirement not met
    MinQueueSize,
    /// Zero was given as timeslot count for a connection
    ZeroTimeslotCount,
    /// Zero was given as duration for one or more timeslots
    NullTimeslotDuration,
    /// Configuration change attempted while the engine is running
    ChangingConfigWhileRunning,
    /// Configuration change attempted after `setup()`
    InvalidOperationAfterSetup,
    /// The TX queue of the sender is full
    SendQueueFull,
    /// The payload is greater than the available slot space
    SizeTooBig,
    /// The RX queue of the receiver is empty
    ReceiveQueueEmpty,
    /// A received payload was dropped because the RX queue is full
    RxOverrun,
    /// The maximum number of connections on the timeslot is already reached
    TimeslotConnLimitReached,
    /// Connections sharing a timeslot have mismatching link configuration
    NonMatchingSameTimeslotConnField,
    /// Connection priority is not enabled on every connection of the timeslot
    PrioNotEnableOnAllConn,
    /// The priority configuration of the connection is not allowed
    NotAllowedConnPriorityConfiguration,
    /// The priority exceeds the maximum connection priority
    MaxConnPriority,
    /// The provided buffer is too small for the operation
    BufferSizeTooSmall,
    /// One of the parameters has an invalid value
    InvalidParameter,
    /// The computed latency optimization delay is too high
    OptimizationDelayTooHigh,
    /// The configured chip rate is invalid
    ChipRate,
    /// Acknowledgement is not supported on an auto-reply connection
    AckNotSupportedInAutoReplyConnection,
    /// The requested timeslot sleep level conflicts with its connections
    IncorrectTsSleepLevel,
    /// A null/empty argument was provided where content is required
    NullPtr,
}
