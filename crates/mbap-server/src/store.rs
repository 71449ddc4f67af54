//! Bounded coil and register banks served over the wire.

use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mbap_core::pdu::{MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS};
use thiserror::Error;

pub const DEFAULT_BANK_CAPACITY: usize = 64;

/// A read or write that does not fit the addressed bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("quantity must be at least 1")]
    ZeroQuantity,
    #[error("quantity {count} exceeds the per-request limit of {limit}")]
    QuantityTooLarge { count: usize, limit: u16 },
    #[error("{count} entries at address {address} exceed bank capacity {capacity}")]
    OutOfRange {
        address: u16,
        count: usize,
        capacity: usize,
    },
}

/// A fixed-capacity bank addressed from zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank<T> {
    values: Vec<T>,
    read_limit: u16,
    write_limit: u16,
}

impl Bank<bool> {
    /// A coil or discrete-input bank.
    pub fn bits(capacity: usize) -> Self {
        Self::with_limits(capacity, MAX_READ_BITS, MAX_WRITE_COILS)
    }
}

impl Bank<u16> {
    /// A holding or input register bank.
    pub fn registers(capacity: usize) -> Self {
        Self::with_limits(capacity, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS)
    }
}

impl<T: Copy + Default> Bank<T> {
    pub fn with_limits(capacity: usize, read_limit: u16, write_limit: u16) -> Self {
        Self {
            values: vec![T::default(); capacity],
            read_limit,
            write_limit,
        }
    }

    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// The one bounds check every access goes through.
    pub fn check_range(
        &self,
        address: u16,
        count: usize,
        limit: u16,
    ) -> Result<Range<usize>, AddressError> {
        if count == 0 {
            return Err(AddressError::ZeroQuantity);
        }
        if count > usize::from(limit) {
            return Err(AddressError::QuantityTooLarge { count, limit });
        }
        let start = usize::from(address);
        let out_of_range = AddressError::OutOfRange {
            address,
            count,
            capacity: self.capacity(),
        };
        let end = start.checked_add(count).ok_or(out_of_range)?;
        if end > self.capacity() {
            return Err(out_of_range);
        }
        Ok(start..end)
    }

    pub fn read(&self, address: u16, count: usize) -> Result<&[T], AddressError> {
        let range = self.check_range(address, count, self.read_limit)?;
        Ok(&self.values[range])
    }

    pub fn write(&mut self, address: u16, values: &[T]) -> Result<(), AddressError> {
        let range = self.check_range(address, values.len(), self.write_limit)?;
        self.values[range].copy_from_slice(values);
        Ok(())
    }

    pub fn get(&self, address: u16) -> Result<T, AddressError> {
        let range = self.check_range(address, 1, 1)?;
        Ok(self.values[range.start])
    }

    pub fn set(&mut self, address: u16, value: T) -> Result<(), AddressError> {
        let range = self.check_range(address, 1, 1)?;
        self.values[range.start] = value;
        Ok(())
    }
}

/// Bank capacities for a [`DataStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DataStoreConfig {
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            coils: DEFAULT_BANK_CAPACITY,
            discrete_inputs: DEFAULT_BANK_CAPACITY,
            holding_registers: DEFAULT_BANK_CAPACITY,
            input_registers: DEFAULT_BANK_CAPACITY,
        }
    }
}

impl DataStoreConfig {
    /// Same capacity for all four banks.
    pub fn uniform(capacity: usize) -> Self {
        Self {
            coils: capacity,
            discrete_inputs: capacity,
            holding_registers: capacity,
            input_registers: capacity,
        }
    }
}

/// The four Modbus banks.
///
/// Discrete inputs and input registers are read-only on the wire; the host
/// writes them through the `set_*` accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStore {
    coils: Bank<bool>,
    discrete_inputs: Bank<bool>,
    holding_registers: Bank<u16>,
    input_registers: Bank<u16>,
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new(&DataStoreConfig::default())
    }
}

impl DataStore {
    pub fn new(config: &DataStoreConfig) -> Self {
        Self {
            coils: Bank::bits(config.coils),
            discrete_inputs: Bank::bits(config.discrete_inputs),
            holding_registers: Bank::registers(config.holding_registers),
            input_registers: Bank::registers(config.input_registers),
        }
    }

    pub fn coils(&self) -> &Bank<bool> {
        &self.coils
    }

    pub fn coils_mut(&mut self) -> &mut Bank<bool> {
        &mut self.coils
    }

    pub fn discrete_inputs(&self) -> &Bank<bool> {
        &self.discrete_inputs
    }

    pub fn discrete_inputs_mut(&mut self) -> &mut Bank<bool> {
        &mut self.discrete_inputs
    }

    pub fn holding_registers(&self) -> &Bank<u16> {
        &self.holding_registers
    }

    pub fn holding_registers_mut(&mut self) -> &mut Bank<u16> {
        &mut self.holding_registers
    }

    pub fn input_registers(&self) -> &Bank<u16> {
        &self.input_registers
    }

    pub fn input_registers_mut(&mut self) -> &mut Bank<u16> {
        &mut self.input_registers
    }

    pub fn coil(&self, address: u16) -> Result<bool, AddressError> {
        self.coils.get(address)
    }

    pub fn set_coil(&mut self, address: u16, value: bool) -> Result<(), AddressError> {
        self.coils.set(address, value)
    }

    pub fn discrete_input(&self, address: u16) -> Result<bool, AddressError> {
        self.discrete_inputs.get(address)
    }

    pub fn set_discrete_input(&mut self, address: u16, value: bool) -> Result<(), AddressError> {
        self.discrete_inputs.set(address, value)
    }

    pub fn holding_register(&self, address: u16) -> Result<u16, AddressError> {
        self.holding_registers.get(address)
    }

    pub fn set_holding_register(&mut self, address: u16, value: u16) -> Result<(), AddressError> {
        self.holding_registers.set(address, value)
    }

    pub fn input_register(&self, address: u16) -> Result<u16, AddressError> {
        self.input_registers.get(address)
    }

    pub fn set_input_register(&mut self, address: u16, value: u16) -> Result<(), AddressError> {
        self.input_registers.set(address, value)
    }
}

/// A [`DataStore`] shared by every connection behind one coarse lock.
#[derive(Debug, Clone, Default)]
pub struct SharedDataStore {
    inner: Arc<Mutex<DataStore>>,
}

impl From<DataStore> for SharedDataStore {
    fn from(store: DataStore) -> Self {
        Self::new(store)
    }
}

impl SharedDataStore {
    pub fn new(store: DataStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn with_config(config: &DataStoreConfig) -> Self {
        Self::new(DataStore::new(config))
    }

    fn lock(&self) -> MutexGuard<'_, DataStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the lock held.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut DataStore) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn snapshot(&self) -> DataStore {
        self.lock().clone()
    }

    pub fn coil(&self, address: u16) -> Result<bool, AddressError> {
        self.lock().coil(address)
    }

    pub fn set_coil(&self, address: u16, value: bool) -> Result<(), AddressError> {
        self.lock().set_coil(address, value)
    }

    pub fn discrete_input(&self, address: u16) -> Result<bool, AddressError> {
        self.lock().discrete_input(address)
    }

    pub fn set_discrete_input(&self, address: u16, value: bool) -> Result<(), AddressError> {
        self.lock().set_discrete_input(address, value)
    }

    pub fn holding_register(&self, address: u16) -> Result<u16, AddressError> {
        self.lock().holding_register(address)
    }

    pub fn set_holding_register(&self, address: u16, value: u16) -> Result<(), AddressError> {
        self.lock().set_holding_register(address, value)
    }

    pub fn input_register(&self, address: u16) -> Result<u16, AddressError> {
        self.lock().input_register(address)
    }

    pub fn set_input_register(&self, address: u16, value: u16) -> Result<(), AddressError> {
        self.lock().set_input_register(address, value)
    }
}
