use mbap_server::{Dispatcher, DataStore, DataStoreConfig, SharedDataStore};
use proptest::prelude::*;

const CAPACITY: usize = 512;

fn register_write() -> impl Strategy<Value = (u16, Vec<u16>)> {
    (1usize..=123).prop_flat_map(|len| {
        (
            0..=(CAPACITY - len) as u16,
            proptest::collection::vec(any::<u16>(), len),
        )
    })
}

fn coil_write() -> impl Strategy<Value = (u16, Vec<bool>)> {
    (1usize..=CAPACITY).prop_flat_map(|len| {
        (
            0..=(CAPACITY - len) as u16,
            proptest::collection::vec(any::<bool>(), len),
        )
    })
}

proptest! {
    #[test]
    fn register_read_after_write((address, values) in register_write()) {
        let mut store = DataStore::new(&DataStoreConfig::uniform(CAPACITY));
        store.holding_registers_mut().write(address, &values).unwrap();
        prop_assert_eq!(
            store.holding_registers().read(address, values.len()).unwrap(),
            values.as_slice()
        );
    }

    #[test]
    fn coil_read_after_write((address, values) in coil_write()) {
        let mut store = DataStore::new(&DataStoreConfig::uniform(CAPACITY));
        store.coils_mut().write(address, &values).unwrap();
        prop_assert_eq!(store.coils().read(address, values.len()).unwrap(), values.as_slice());
    }

    #[test]
    fn wire_write_then_read_registers((address, values) in register_write()) {
        let store = SharedDataStore::with_config(&DataStoreConfig::uniform(CAPACITY));
        let dispatcher = Dispatcher::new(1, store);
        let quantity = values.len() as u16;

        let mut write = vec![0x10];
        write.extend_from_slice(&address.to_be_bytes());
        write.extend_from_slice(&quantity.to_be_bytes());
        write.push((values.len() * 2) as u8);
        for value in &values {
            write.extend_from_slice(&value.to_be_bytes());
        }
        let echo = dispatcher.execute(&write);
        prop_assert_eq!(&echo[..], &write[..5]);

        let mut read = vec![0x03];
        read.extend_from_slice(&address.to_be_bytes());
        read.extend_from_slice(&quantity.to_be_bytes());
        let response = dispatcher.execute(&read);
        prop_assert_eq!(response[0], 0x03);
        prop_assert_eq!(usize::from(response[1]), values.len() * 2);
        let read_back: Vec<u16> = response[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        prop_assert_eq!(read_back, values);
    }

    #[test]
    fn out_of_range_reads_are_illegal_address(address in any::<u16>(), quantity in any::<u16>()) {
        let dispatcher = Dispatcher::new(1, SharedDataStore::default());
        let mut request = vec![0x01];
        request.extend_from_slice(&address.to_be_bytes());
        request.extend_from_slice(&quantity.to_be_bytes());
        let response = dispatcher.execute(&request);

        let fits = quantity >= 1
            && quantity <= 2000
            && usize::from(address) + usize::from(quantity) <= 64;
        if fits {
            prop_assert_eq!(response[0], 0x01);
        } else {
            prop_assert_eq!(response, vec![0x81, 0x02]);
        }
    }
}
