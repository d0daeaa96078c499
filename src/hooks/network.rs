//! Packet send and receive hooks of the network manager

use std::sync::Arc;

use crate::browser::NetworkManager;
use crate::error::Result;
use crate::memory::{Memory, MemoryExt};
use crate::wrapper::convention::{FunctionDescriptor, Register};

use super::{names, CancelableHook, Event, HookContext, HookOptions};

/// Longest packet read from the client
pub const MAX_PACKET_LEN: usize = 0x10000;

/// Packet sent or received by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketEventArgs {
    /// Object the packet is sent or received through
    pub packet_object: usize,
    /// Text of the packet
    pub packet: String,
}

/// Delphi `AnsiString` allocated by this crate
///
/// The client expects the reference count and the length in front of the characters, so the
/// pointer handed out points 8 bytes into the allocation. A reference count of -1 marks a constant
/// string the client never frees.
pub struct AnsiString {
    /// Header, characters and terminator packed into aligned words
    words: Vec<u32>,
    /// Length of the string in bytes
    len: usize,
}

impl AnsiString {
    /// Size of the header in front of the characters
    const HEADER_LEN: usize = 8;

    /// Copies `value` into a new string
    pub fn new(value: &str) -> Self {
        let mut bytes = Vec::with_capacity(Self::HEADER_LEN + value.len() + 1);
        bytes.extend_from_slice(&(-1i32).to_le_bytes());
        bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);

        let words = bytes
            .chunks(4)
            .map(|chunk| {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                u32::from_le_bytes(word)
            })
            .collect();
        Self {
            words,
            len: value.len(),
        }
    }

    /// Address of the first character, as passed to the client
    pub fn as_ptr(&self) -> usize {
        self.words.as_ptr() as usize + Self::HEADER_LEN
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the string is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Calling convention of both packet functions, `(object: eax, packet: edx)`
const PACKET_DESCRIPTOR: FunctionDescriptor =
    FunctionDescriptor::register(&[Register::Eax, Register::Edx], 2);

/// Hooks a packet function, reading the packet from the second argument
fn packet_hook(
    context: &HookContext<'_>,
    name: &'static str,
    options: &HookOptions,
) -> Result<CancelableHook<PacketEventArgs>> {
    let memory: Arc<dyn Memory> = context.binding.memory().clone();
    CancelableHook::create(context.binding, name, PACKET_DESCRIPTOR, options, true, move |args| {
        let (packet_object, packet) = (args.first()?, args.get(1)?);
        if *packet == 0 {
            return None;
        }
        let packet = memory.read_c_string(*packet, MAX_PACKET_LEN).ok()?;
        Some(PacketEventArgs {
            packet_object: *packet_object,
            packet,
        })
    })
}

/// Hook of the function sending packets to the server
pub struct PacketSendHook {
    /// Shared core
    core: CancelableHook<PacketEventArgs>,
    /// Object the packets are sent through
    network: Option<Arc<NetworkManager>>,
}

impl PacketSendHook {
    /// Calling convention of the function
    pub const DESCRIPTOR: FunctionDescriptor = PACKET_DESCRIPTOR;

    /// Locates and hooks the function
    pub fn create(context: &HookContext<'_>) -> Result<Self> {
        Ok(Self {
            core: packet_hook(context, names::PACKET_SEND, &context.options.packet_send)?,
            network: context.browser.network_manager(),
        })
    }

    /// Handlers of sent packets; cancelling drops the packet
    pub fn called(&self) -> &Event<PacketEventArgs> {
        self.core.called()
    }

    /// Calls the original function with a raw `AnsiString` pointer
    pub fn original(&self, packet_object: usize, packet: usize) -> Result<usize> {
        self.core.call_original(&[packet_object, packet])
    }

    /// Sends packets the way the client does, if the network manager is loaded
    pub fn wrapper(&self) -> Option<PacketSender<'_>> {
        self.network.clone().map(|network| PacketSender {
            hook: self,
            network,
        })
    }
}

nos_hook!(PacketSendHook, PacketEventArgs, |hook| hook.network.is_some());

/// Sends packets to the server
pub struct PacketSender<'a> {
    /// Hook whose original function is called
    hook: &'a PacketSendHook,
    /// Object the packets are sent through
    network: Arc<NetworkManager>,
}

impl PacketSender<'_> {
    /// Sends `packet`, the handlers of the hook are not notified
    pub fn send(&self, packet: &str) -> Result<()> {
        let object = self.network.address()?;
        let string = AnsiString::new(packet);
        self.hook.original(object, string.as_ptr())?;
        Ok(())
    }
}

/// Hook of the function handling packets received from the server
pub struct PacketReceiveHook {
    /// Shared core
    core: CancelableHook<PacketEventArgs>,
    /// Owner of the object the packets are received through
    network: Option<Arc<NetworkManager>>,
}

impl PacketReceiveHook {
    /// Calling convention of the function
    pub const DESCRIPTOR: FunctionDescriptor = PACKET_DESCRIPTOR;

    /// Locates and hooks the function
    pub fn create(context: &HookContext<'_>) -> Result<Self> {
        Ok(Self {
            core: packet_hook(context, names::PACKET_RECEIVE, &context.options.packet_receive)?,
            network: context.browser.network_manager(),
        })
    }

    /// Handlers of received packets; cancelling hides the packet from the client
    pub fn called(&self) -> &Event<PacketEventArgs> {
        self.core.called()
    }

    /// Calls the original function with a raw `AnsiString` pointer
    pub fn original(&self, packet_object: usize, packet: usize) -> Result<usize> {
        self.core.call_original(&[packet_object, packet])
    }

    /// Fakes received packets, if the network manager is loaded
    pub fn wrapper(&self) -> Option<PacketReceiver<'_>> {
        self.network.clone().map(|network| PacketReceiver {
            hook: self,
            network,
        })
    }
}

nos_hook!(PacketReceiveHook, PacketEventArgs, |hook| hook.network.is_some());

/// Makes the client handle packets as if the server sent them
pub struct PacketReceiver<'a> {
    /// Hook whose original function is called
    hook: &'a PacketReceiveHook,
    /// Owner of the receiving object
    network: Arc<NetworkManager>,
}

impl PacketReceiver<'_> {
    /// Lets the client handle `packet`, the handlers of the hook are not notified
    pub fn receive(&self, packet: &str) -> Result<()> {
        let object = self.network.receive_object()?;
        let string = AnsiString::new(packet);
        self.hook.original(object, string.as_ptr())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::binding::tests::{fake_binding, BASE};
    use crate::browser::{BrowserManager, BrowserOptions, PointerOptions};
    use crate::hook::Decision;
    use crate::hooks::network::{AnsiString, PacketReceiveHook, PacketSendHook};
    use crate::hooks::{HookContext, HookManagerOptions, HookOptions, NosHook};
    use crate::memory::{LocalMemory, MemoryExt};

    /// `mov eax, [global]` locating the network manager
    const NETWORK_CODE: [u8; 7] = [0xa1, 0, 0, 0, 0, 0xe8, 0x91];
    /// Entry of the packet function
    const PACKET_CODE: [u8; 4] = [0x53, 0x56, 0x8b, 0xf2];

    /// Catalog options hooking the packet functions at offset 0x10
    fn options() -> HookManagerOptions {
        HookManagerOptions {
            packet_send: HookOptions::new("Send", true, "53 56 8B F2", 0),
            packet_receive: HookOptions::new("Receive", true, "53 56 8B F2", 0),
            ..Default::default()
        }
    }

    /// Object bindings with the network manager at `BASE + 0x900`
    fn browser(binding: &crate::binding::ProcessBinding) -> BrowserManager {
        let memory = binding.memory();
        memory.write_pointer(BASE + 0x101, BASE + 0x800).unwrap();
        memory.write_pointer(BASE + 0x800, BASE + 0x900).unwrap();
        memory.write_pointer(BASE + 0x900 + 0x34, BASE + 0xa00).unwrap();

        let browser = BrowserManager::new(BrowserOptions {
            network_manager: PointerOptions::new("A1 ?? ?? ?? ?? E8 91", &[1, 0]),
            ..Default::default()
        });
        let _ = browser.initialize(binding);
        browser
    }

    #[test]
    /// Handlers see the packet text and can drop it
    fn test_send_event() {
        let (binding, interceptor) =
            fake_binding(&[(0x10, &PACKET_CODE), (0x100, &NETWORK_CODE), (0x200, b"walk 10 12\0")]);
        let browser = browser(&binding);
        let options = options();
        let context = HookContext {
            binding: &binding,
            browser: &browser,
            options: &options,
        };
        let hook = PacketSendHook::create(&context).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let packets = seen.clone();
        hook.called().subscribe(move |args| {
            packets.lock().push(args.packet.clone());
            if args.packet.starts_with("walk") {
                Decision::Cancel
            } else {
                Decision::Continue
            }
        });

        let function = interceptor.function("NetworkManager.PacketSend");
        assert_eq!(function.call(&[BASE + 0x900, BASE + 0x200]), 0);
        assert_eq!(*seen.lock(), vec!["walk 10 12".to_string()]);
        // a null packet skips the handlers
        assert_eq!(function.call(&[BASE + 0x900, 0]), 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    /// The wrappers pass the right object and do not notify the handlers
    fn test_wrappers() {
        let (binding, interceptor) = fake_binding(&[(0x10, &PACKET_CODE), (0x100, &NETWORK_CODE)]);
        let browser = browser(&binding);
        let options = options();
        let context = HookContext {
            binding: &binding,
            browser: &browser,
            options: &options,
        };
        let send = PacketSendHook::create(&context).unwrap();
        let receive = PacketReceiveHook::create(&context).unwrap();
        assert!(send.is_usable() && receive.is_usable());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        send.called().subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Decision::Cancel
        });

        send.wrapper().unwrap().send("say hello").unwrap();
        receive.wrapper().unwrap().receive("say hello").unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let calls = interceptor.function("NetworkManager.PacketSend").original_calls();
        assert_eq!(calls[0][0], BASE + 0x900);
        let calls = interceptor.function("NetworkManager.PacketReceive").original_calls();
        assert_eq!(calls[0][0], BASE + 0xa00);
    }

    #[test]
    /// Without the network manager there is nothing to send through
    fn test_not_usable() {
        let (binding, _) = fake_binding(&[(0x10, &PACKET_CODE)]);
        let browser = BrowserManager::new(BrowserOptions::default());
        let _ = browser.initialize(&binding);
        let options = options();
        let context = HookContext {
            binding: &binding,
            browser: &browser,
            options: &options,
        };
        let hook = PacketSendHook::create(&context).unwrap();

        assert!(!hook.is_usable());
        assert!(hook.wrapper().is_none());
        assert!(hook.is_enabled());
    }

    #[test]
    /// The header in front of the characters holds the reference count and the length
    fn test_ansi_string() {
        let string = AnsiString::new("c_info");
        let memory = LocalMemory::new();

        assert_eq!(string.len(), 6);
        assert_eq!(memory.read_i32(string.as_ptr() - 8).unwrap(), -1);
        assert_eq!(memory.read_u32(string.as_ptr() - 4).unwrap(), 6);
        assert_eq!(memory.read_c_string(string.as_ptr(), 64).unwrap(), "c_info");
        assert_eq!(string.as_ptr() % 4, 0);
    }
}
