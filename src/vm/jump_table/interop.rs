//! The `SYSCALL` handler and the interop services it models.
//!
//! Only the storage services are given symbolic semantics. Their effect on
//! contract storage is tracked in a [`StorageView`] side table and every access
//! is recorded with the access tracker. Any other service is unsupported.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::{Display, Formatter},
    sync::OnceLock,
};

use sha2::{Digest, Sha256};

use crate::{
    constant::{
        STORAGE_DELETE,
        STORAGE_GET,
        STORAGE_GET_CONTEXT,
        STORAGE_GET_READ_ONLY_CONTEXT,
        STORAGE_PUT,
        SYSCALL_HASH_BYTES,
    },
    disassembly::Instruction,
    error::execution::Error,
    vm::{
        jump_table::HandlerResult,
        state::{tracking::Access, AnalysisState},
        value::{StackItem, StackItemType, SymbolicVariable, NULL},
        SymbolicVM,
    },
};

/// Computes the hash by which `SYSCALL` names the interop service `name`: the
/// first four bytes of the SHA-256 digest of the name, read little-endian.
#[must_use]
pub fn interop_hash(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; SYSCALL_HASH_BYTES];
    bytes.copy_from_slice(&digest[..SYSCALL_HASH_BYTES]);
    u32::from_le_bytes(bytes)
}

/// The interop services with symbolic semantics.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StorageService {
    GetContext,
    GetReadOnlyContext,
    Get,
    Put,
    Delete,
}

impl StorageService {
    const ALL: [Self; 5] = [
        Self::GetContext,
        Self::GetReadOnlyContext,
        Self::Get,
        Self::Put,
        Self::Delete,
    ];

    /// Gets the interop name of the service.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::GetContext => STORAGE_GET_CONTEXT,
            Self::GetReadOnlyContext => STORAGE_GET_READ_ONLY_CONTEXT,
            Self::Get => STORAGE_GET,
            Self::Put => STORAGE_PUT,
            Self::Delete => STORAGE_DELETE,
        }
    }

    /// Looks up the service called by a `SYSCALL` carrying `hash`.
    #[must_use]
    pub fn from_hash(hash: u32) -> Option<Self> {
        static SERVICES: OnceLock<HashMap<u32, StorageService>> = OnceLock::new();
        SERVICES
            .get_or_init(|| {
                Self::ALL
                    .into_iter()
                    .map(|service| (interop_hash(service.name()), service))
                    .collect()
            })
            .get(&hash)
            .copied()
    }
}

impl Display for StorageService {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The contents of contract storage as far as the current run has written
/// them.
///
/// A key maps to [`None`] once it has been deleted. After a write to a
/// symbolic key any other key may have been overwritten, so reads of keys not
/// written explicitly become unknown.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StorageView {
    values:    BTreeMap<StackItem, Option<StackItem>>,
    clobbered: bool,
}

impl StorageView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the value a read of `key` observes.
    #[must_use]
    pub fn get(&self, key: &StackItem) -> StackItem {
        match self.values.get(key) {
            Some(Some(value)) => value.clone(),
            Some(None) => NULL,
            None if self.clobbered => StackItem::unknown(StackItemType::Any),
            None => StackItem::variable(SymbolicVariable::Storage { key: key.clone() }),
        }
    }

    /// Writes `value` under `key`, or deletes the key if `value` is [`None`].
    pub fn set(&mut self, key: StackItem, value: Option<StackItem>) {
        if key.is_symbolic() {
            self.clobbered = true;
        }
        self.values.insert(key, value);
    }
}

impl AnalysisState for StorageView {}

/// `SYSCALL` dispatches to the storage service named by its operand.
pub fn syscall(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let hash = instruction.token_u32()?;
    let service = StorageService::from_hash(hash).ok_or(Error::UnsupportedSyscall { hash })?;
    let offset = instruction.offset();

    match service {
        StorageService::GetContext | StorageService::GetReadOnlyContext => {
            vm.push(StackItem::unknown(StackItemType::InteropInterface))
        }
        StorageService::Get => {
            vm.pop()?;
            let key = pop_key(vm)?;
            vm.record_read(Access::Storage { key: key.clone() }, offset)?;
            let value = vm
                .shared_mut()?
                .get_or_create_state(StorageView::new)?
                .get(&key);
            vm.push(value)
        }
        StorageService::Put => {
            vm.pop()?;
            let key = pop_key(vm)?;
            let value = vm.pop()?;
            vm.record_write(Access::Storage { key: key.clone() }, offset)?;
            vm.shared_mut()?
                .get_or_create_state(StorageView::new)?
                .set(key, Some(value));
            Ok(())
        }
        StorageService::Delete => {
            vm.pop()?;
            let key = pop_key(vm)?;
            vm.record_write(Access::Storage { key: key.clone() }, offset)?;
            vm.shared_mut()?
                .get_or_create_state(StorageView::new)?
                .set(key, None);
            Ok(())
        }
    }
}

/// Pops a storage key, normalizing known keys to byte strings so that equal
/// keys of different types name the same cell.
fn pop_key(vm: &mut SymbolicVM) -> Result<StackItem, Error> {
    let key = vm.pop()?;
    let bytes = vm.shared_mut()?.heap.bytes_of(&key)?;
    Ok(bytes.map_or(key, StackItem::bytes))
}

#[cfg(test)]
mod test {
    use crate::{
        constant::{STORAGE_GET, STORAGE_GET_CONTEXT, STORAGE_PUT},
        disassembly::ScriptBuilder,
        error::execution::Error,
        opcode::OpCode,
        vm::{
            jump_table::{
                interop::{interop_hash, StorageService},
                test_util::{execute, final_stack, stack},
            },
            state::tracking::Access,
            value::{StackItem, SymbolicVariable},
            Outcome,
        },
    };

    #[test]
    fn services_are_found_by_hash() {
        for service in StorageService::ALL {
            assert_eq!(
                StorageService::from_hash(interop_hash(service.name())),
                Some(service)
            );
        }
        assert_eq!(
            StorageService::from_hash(interop_hash("System.Runtime.Log")),
            None
        );
    }

    #[test]
    fn unwritten_reads_are_storage_variables() -> anyhow::Result<()> {
        let script = ScriptBuilder::new()
            .emit(OpCode::Push1)
            .emit_syscall(STORAGE_GET_CONTEXT)
            .emit_syscall(STORAGE_GET)
            .build();
        let (vm, _) = execute(script)?;
        let stack = stack(&vm)?;

        // The integer key normalizes to its byte encoding.
        let key = StackItem::bytes(vec![1]);
        assert_eq!(
            stack,
            vec![StackItem::variable(SymbolicVariable::Storage { key: key.clone() })]
        );
        assert_eq!(vm.accesses().read_set(), vec![Access::Storage { key }]);

        Ok(())
    }

    #[test]
    fn reads_after_writes_observe_the_written_value() -> anyhow::Result<()> {
        let mut builder = ScriptBuilder::new();
        builder
            .emit(OpCode::Push7)
            .emit_push_data(b"k")?
            .emit_syscall(STORAGE_GET_CONTEXT)
            .emit_syscall(STORAGE_PUT)
            .emit_push_data(b"k")?
            .emit_syscall(STORAGE_GET_CONTEXT)
            .emit_syscall(STORAGE_GET);
        let (vm, _) = execute(builder.build())?;

        let stack = stack(&vm)?;
        assert_eq!(stack, vec![StackItem::integer(7)]);
        let accesses = vm.accesses();
        assert!(accesses.read_set().is_empty());
        assert_eq!(
            accesses.write_set(),
            vec![Access::Storage {
                key: StackItem::bytes(b"k".to_vec()),
            }]
        );

        Ok(())
    }

    #[test]
    fn other_services_are_unresolved() -> anyhow::Result<()> {
        let script = ScriptBuilder::new()
            .emit(OpCode::Nop)
            .emit_syscall("System.Runtime.Log")
            .build();
        let (_, outcome) = execute(script)?;
        let Outcome::Unresolved(error) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(error.location, 1);
        assert_eq!(
            error.payload,
            Error::UnsupportedSyscall {
                hash: interop_hash("System.Runtime.Log"),
            }
        );

        Ok(())
    }

    #[test]
    fn contexts_are_opaque() -> anyhow::Result<()> {
        let script = ScriptBuilder::new()
            .emit_syscall(STORAGE_GET_CONTEXT)
            .build();
        let stack = final_stack(script)?;
        assert!(stack[0].is_symbolic());

        Ok(())
    }
}
