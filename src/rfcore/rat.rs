//! # RAT Channel Manager
//!
//! Bookkeeping for the radio timer compare/capture channels handed to
//! applications. The channel map is unknown until the radio firmware has been
//! queried on the first power-up; allocation fails until then.

use log::debug;

use crate::constants::{DEFAULT_AVAIL_RAT_CH, RAT_CH_MAX, RAT_CH_OFFSET};
use crate::error::RfError;
use crate::rfcore::core::{cmdsta_result, RfCore};
use crate::rfcore::mailbox::{
    direct_2byte, HwInterrupt, CMD_DISABLE_RAT_CH, CMD_SET_RAT_CMP, CMD_SET_RAT_CPT,
    CMD_SET_RAT_OUTPUT,
};
use crate::rfcore::power::PowerConstraint;
use crate::rfcore::types::{
    ClientId, RadioOp, RatCallback, RatCaptureConfig, RatHwOutputConfig,
};

/// Owner of an allocated channel
#[derive(Clone)]
pub struct RatChannelOwner {
    pub client: ClientId,
    pub callback: Option<RatCallback>,
}

/// Allocation state of the RAT channels
pub struct RatChannelManager {
    /// Bit n set: channel n is free
    avail: u16,
    /// Bit n set: channel n is capturing repeatedly
    repeat_capture: u16,
    owners: [Option<RatChannelOwner>; RAT_CH_MAX as usize],
}

impl Default for RatChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RatChannelManager {
    pub fn new() -> Self {
        Self {
            avail: DEFAULT_AVAIL_RAT_CH,
            repeat_capture: 0,
            owners: Default::default(),
        }
    }

    /// Free channel map, `0xFFFF` while unknown
    pub fn available(&self) -> u16 {
        self.avail
    }

    pub fn is_known(&self) -> bool {
        self.avail != DEFAULT_AVAIL_RAT_CH
    }

    /// Install the channel map reported by the radio firmware
    pub fn set_available(&mut self, avail: u16) {
        self.avail = avail;
    }

    /// Claim the lowest free channel
    pub fn allocate(&mut self) -> Result<u8, RfError> {
        if !self.is_known() {
            return Err(RfError::AllocationExhausted);
        }
        let channel = (0..15u8)
            .find(|ch| self.avail & (1 << ch) != 0)
            .ok_or(RfError::AllocationExhausted)?;
        self.avail &= !(1 << channel);
        Ok(channel)
    }

    /// Return a channel to the free map
    ///
    /// Returns false, leaving the channel allocated, when it is capturing
    /// repeatedly and `force` is not set.
    pub fn free(&mut self, channel: u8, force: bool) -> bool {
        let bit = 1u16 << channel;
        if self.repeat_capture & bit != 0 && !force {
            return false;
        }
        self.repeat_capture &= !bit;
        self.avail |= bit;
        if let Some(owner) = self.owner_slot(channel) {
            *owner = None;
        }
        true
    }

    /// Record the client and callback of a channel
    pub fn set_owner(&mut self, channel: u8, owner: RatChannelOwner) {
        if let Some(slot) = self.owner_slot(channel) {
            *slot = Some(owner);
        }
    }

    pub fn owner(&self, channel: u8) -> Option<&RatChannelOwner> {
        let index = channel.checked_sub(RAT_CH_OFFSET)? as usize;
        self.owners.get(index).and_then(Option::as_ref)
    }

    pub fn set_repeat_capture(&mut self, channel: u8, repeat: bool) {
        if repeat {
            self.repeat_capture |= 1 << channel;
        } else {
            self.repeat_capture &= !(1 << channel);
        }
    }

    pub fn is_repeat_capture(&self, channel: u8) -> bool {
        self.repeat_capture & (1 << channel) != 0
    }

    fn owner_slot(&mut self, channel: u8) -> Option<&mut Option<RatChannelOwner>> {
        let index = channel.checked_sub(RAT_CH_OFFSET)? as usize;
        self.owners.get_mut(index)
    }
}

impl RfCore {
    /// Arm a compare channel to fire at `time`
    pub fn rat_compare(
        &mut self,
        client: ClientId,
        time: u32,
        callback: Option<RatCallback>,
    ) -> Result<u8, RfError> {
        let channel = self.rat_alloc(client, callback)?;
        let mut payload = vec![channel, 0];
        payload.extend_from_slice(&time.to_le_bytes());
        let op = RadioOp::new(CMD_SET_RAT_CMP).with_payload(payload);

        match cmdsta_result(self.radio.send_immediate(&op)) {
            Ok(_) => {
                debug!("{client}: RAT channel {channel} compares at {time}");
                Ok(channel)
            }
            Err(e) => {
                self.rat_free(channel, false);
                Err(e)
            }
        }
    }

    /// Arm a capture channel
    pub fn rat_capture(
        &mut self,
        client: ClientId,
        config: RatCaptureConfig,
        callback: Option<RatCallback>,
    ) -> Result<u8, RfError> {
        let channel = self.rat_alloc(client, callback)?;
        let mut word = config.source | (((channel as u16) << 8) & 0x0F00);
        if config.repeat {
            word |= 0x1000;
        }

        match cmdsta_result(self.radio.send_direct(direct_2byte(CMD_SET_RAT_CPT, word))) {
            Ok(_) => {
                self.rat.set_repeat_capture(channel, config.repeat);
                debug!("{client}: RAT channel {channel} captures (repeat {})", config.repeat);
                Ok(channel)
            }
            Err(e) => {
                self.rat_free(channel, false);
                Err(e)
            }
        }
    }

    /// Disarm a channel and return it to the pool
    pub fn rat_disable_channel(&mut self, client: ClientId, channel: u8) -> Result<(), RfError> {
        self.rat_check_access(client)?;
        if self.rat.owner(channel).is_none() {
            return Err(RfError::InvalidParams(format!("RAT channel {channel} is not allocated")));
        }
        self.rat.set_repeat_capture(channel, false);
        self.rat_free(channel, false);
        cmdsta_result(
            self.radio
                .send_direct(direct_2byte(CMD_DISABLE_RAT_CH, (channel as u16) << 8)),
        )?;
        Ok(())
    }

    /// Route RAT events to a hardware output line
    pub fn rat_hw_output(
        &mut self,
        client: ClientId,
        config: RatHwOutputConfig,
    ) -> Result<(), RfError> {
        self.rat_check_access(client)?;
        let word = (((config.mode as u16) << 2) & 0x1C) | (((config.select as u16) << 5) & 0xE0);
        cmdsta_result(self.radio.send_direct(direct_2byte(CMD_SET_RAT_OUTPUT, word)))?;
        Ok(())
    }

    fn rat_check_access(&self, client: ClientId) -> Result<(), RfError> {
        self.client(client)?;
        if self.flags.radio_active || self.flags.change_phy {
            Ok(())
        } else {
            Err(RfError::RadioInactive)
        }
    }

    fn rat_alloc(&mut self, client: ClientId, callback: Option<RatCallback>) -> Result<u8, RfError> {
        self.rat_check_access(client)?;
        let channel = self.rat.allocate()?;
        self.rat.set_owner(channel, RatChannelOwner { client, callback });
        self.constraints.set(PowerConstraint::RAT);
        self.radio
            .enable_hw_interrupts(HwInterrupt::rat_channel(channel));
        Ok(channel)
    }

    /// Free a channel unless it keeps capturing; drops the RAT power
    /// constraint once no channel interrupt is left enabled
    pub(crate) fn rat_free(&mut self, channel: u8, force: bool) {
        if self.rat.free(channel, force) {
            self.radio
                .disable_hw_interrupts(HwInterrupt::rat_channel(channel));
        }
        let armed = self.radio.hw_interrupts_enabled() & HwInterrupt::RAT_CHANNELS;
        if armed.is_empty() && self.constraints.contains(PowerConstraint::RAT) {
            let _ = self.release_constraint(PowerConstraint::RAT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_map_refuses_allocation() {
        let mut rat = RatChannelManager::new();
        assert_eq!(rat.allocate(), Err(RfError::AllocationExhausted));
    }

    #[test]
    fn test_lowest_channel_first() {
        let mut rat = RatChannelManager::new();
        rat.set_available(0x00E0);
        assert_eq!(rat.allocate(), Ok(5));
        assert_eq!(rat.allocate(), Ok(6));
        assert_eq!(rat.allocate(), Ok(7));
        assert_eq!(rat.allocate(), Err(RfError::AllocationExhausted));
        assert!(rat.free(6, false));
        assert_eq!(rat.allocate(), Ok(6));
    }

    #[test]
    fn test_repeat_capture_survives_free() {
        let mut rat = RatChannelManager::new();
        rat.set_available(0x00E0);
        let ch = rat.allocate().unwrap();
        rat.set_owner(ch, RatChannelOwner { client: ClientId(0), callback: None });
        rat.set_repeat_capture(ch, true);
        assert!(!rat.free(ch, false));
        assert!(rat.owner(ch).is_some());
        assert!(rat.free(ch, true));
        assert!(rat.owner(ch).is_none());
        assert_eq!(rat.available(), 0x00E0);
    }
}
