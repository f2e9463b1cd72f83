use clap::Subcommand;
use hearth_core::StoreContactDirectory;

use super::{open_store, print_json, CliResult};

#[derive(Subcommand)]
pub enum ContactAction {
    /// Add an emergency contact for a user
    Add {
        user: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long)]
        primary: bool,
    },
    /// List a user's emergency contacts
    List { user: String },
    /// Remove an emergency contact
    Remove { user: String, contact_id: String },
}

pub fn run(action: ContactAction) -> CliResult {
    let contacts = StoreContactDirectory::new(open_store()?);
    match action {
        ContactAction::Add {
            user,
            name,
            phone,
            email,
            primary,
        } => print_json(&contacts.add(&user, &name, &phone, &email, primary)?),
        ContactAction::List { user } => print_json(&contacts.contacts_of(&user)?),
        ContactAction::Remove { user, contact_id } => {
            contacts.remove(&user, &contact_id)?;
            println!("removed {contact_id}");
            Ok(())
        }
    }
}
