//! Main menu: the three fixed service buttons.

use crate::chatbot::message::OutboundReply;
use crate::chatbot::transport::{Transport, TransportError};

/// Typing this (any case) brings the menu back.
pub const MENU_COMMAND: &str = "menu";

/// A selectable menu button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuOption {
    ProductInfo,
    OrderStatus,
    ContactSupport,
}

impl MenuOption {
    pub const ALL: [MenuOption; 3] = [
        MenuOption::ProductInfo,
        MenuOption::OrderStatus,
        MenuOption::ContactSupport,
    ];

    /// Button reply ID.
    pub fn id(self) -> &'static str {
        match self {
            MenuOption::ProductInfo => "info_produk",
            MenuOption::OrderStatus => "cek_order",
            MenuOption::ContactSupport => "kontak_cs",
        }
    }

    /// Button title shown to the user (max 20 chars on WhatsApp).
    pub fn label(self) -> &'static str {
        match self {
            MenuOption::ProductInfo => "💡 Info Produk",
            MenuOption::OrderStatus => "📦 Cek Order",
            MenuOption::ContactSupport => "📞 Kontak CS",
        }
    }

    /// Fixed reply sent when the button is chosen.
    pub fn reply(self) -> &'static str {
        match self {
            MenuOption::ProductInfo => "Produk kami: Internet, CCTV, jaringan kantor, instalasi rumah.",
            MenuOption::OrderStatus => "Ketik \"CekOrder [nomor]\" untuk status order Anda.",
            MenuOption::ContactSupport => {
                "Silakan hubungi CS kami di 0822-xxxx-xxxx (WhatsApp & Telepon)."
            }
        }
    }

    /// Resolve a button ID or label, case-insensitively. The whole text must match.
    pub fn resolve(text: &str) -> Option<MenuOption> {
        let text = text.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|o| text == o.id() || text == o.label().to_lowercase())
    }
}

/// The interactive message offering the menu options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    pub header: &'static str,
    pub body: &'static str,
    pub footer: &'static str,
    pub options: [MenuOption; 3],
}

impl Menu {
    pub fn main() -> Self {
        Self {
            header: "Menu Utama",
            body: "Silakan pilih layanan:",
            footer: "Pilih salah satu layanan",
            options: MenuOption::ALL,
        }
    }
}

/// Send the main menu to `to`.
pub async fn present_menu(transport: &dyn Transport, to: &str) -> Result<(), TransportError> {
    transport.send(to, OutboundReply::Menu(Menu::main())).await
}
