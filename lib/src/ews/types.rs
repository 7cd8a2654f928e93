//! Data model for the EWS `CreateItem` operation and its XML form.
//!
//! The service is schema-strict: element order, attribute placement and the
//! `m:`/`t:` namespace prefixes below are part of the wire contract and must
//! not be rearranged.

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;

use crate::config::Config;
use crate::email;
use crate::error::Error;

/// Item class identifying a standard note/message.
pub const ITEM_CLASS_MESSAGE: &str = "IPM.Note";
/// Routing type for SMTP-addressed mailboxes.
pub const ROUTING_TYPE_SMTP: &str = "SMTP";
/// Mailbox type of a standard user mailbox.
pub const MAILBOX_TYPE_MAILBOX: &str = "Mailbox";
/// Distinguished folder that receives the saved copy of sent mail.
pub const SENT_ITEMS_FOLDER_ID: &str = "sentitems";
/// Content type applied to attachments that do not declare one.
pub const DEFAULT_ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

/// The action the server takes when the item is created.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MessageDisposition {
    SaveOnly,
    SendOnly,
    SendAndSaveCopy,
}

impl MessageDisposition {
    pub fn as_str(&self) -> &'static str {
        match *self {
            MessageDisposition::SaveOnly => "SaveOnly",
            MessageDisposition::SendOnly => "SendOnly",
            MessageDisposition::SendAndSaveCopy => "SendAndSaveCopy",
        }
    }
}

/// Declared content type of the message body.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub enum BodyType {
    #[serde(rename = "HTML")]
    Html,
    Text,
}

impl BodyType {
    pub fn as_str(&self) -> &'static str {
        match *self {
            BodyType::Html => "HTML",
            BodyType::Text => "Text",
        }
    }
}

impl Default for BodyType {
    fn default() -> Self {
        BodyType::Html
    }
}

/// The `m:CreateItem` request: disposition, save folder and the items to
/// create.
#[derive(Debug)]
pub struct CreateItem {
    pub message_disposition: MessageDisposition,
    /// Distinguished folder id the sent copy is saved to.
    pub saved_item_folder_id: String,
    pub items: Vec<Message>,
}

#[derive(Debug)]
pub struct Message {
    pub item_class: String,
    pub subject: String,
    pub body: Body,
    pub attachments: Vec<FileAttachment>,
    pub sender: Mailbox,
    pub to_recipients: Vec<Mailbox>,
    pub cc_recipients: Vec<Mailbox>,
    pub bcc_recipients: Vec<Mailbox>,
    pub is_read_receipt_requested: bool,
    pub is_delivery_receipt_requested: bool,
}

#[derive(Debug)]
pub struct Body {
    pub body_type: BodyType,
    pub content: String,
}

#[derive(Debug)]
pub struct Mailbox {
    pub email_address: String,
    pub routing_type: Option<String>,
    pub mailbox_type: Option<String>,
}

impl Mailbox {
    /// Address-only entry; the server applies its own routing defaults.
    pub fn address(addr: &str) -> Self {
        Self {
            email_address: addr.to_string(),
            routing_type: None,
            mailbox_type: None,
        }
    }

    /// Fully qualified SMTP mailbox entry.
    pub fn smtp(addr: &str) -> Self {
        Self {
            email_address: addr.to_string(),
            routing_type: Some(ROUTING_TYPE_SMTP.to_string()),
            mailbox_type: Some(MAILBOX_TYPE_MAILBOX.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct FileAttachment {
    pub name: String,
    pub content_id: String,
    pub content_type: String,
    pub content_location: String,
    /// Decoded byte length of the payload.
    pub size: usize,
    pub last_modified_time: DateTime<Utc>,
    pub is_inline: bool,
    /// Base64 of the attachment bytes.
    pub content: String,
}

impl From<email::Attachment> for FileAttachment {
    fn from(attachment: email::Attachment) -> FileAttachment {
        let size = attachment.data.len();
        FileAttachment {
            content: base64::encode(&attachment.data),
            size,
            name: attachment.name,
            content_id: attachment.content_id.unwrap_or_default(),
            content_type: attachment
                .content_type
                .unwrap_or_else(|| DEFAULT_ATTACHMENT_CONTENT_TYPE.to_string()),
            content_location: attachment.content_location.unwrap_or_default(),
            last_modified_time: attachment.last_modified.unwrap_or_else(Utc::now),
            is_inline: attachment.is_inline,
        }
    }
}

impl CreateItem {
    /// Build the request for a single outgoing message.
    ///
    /// The message is always sent with a copy saved to the sent-items
    /// distinguished folder. Only the sender mailbox is fully qualified;
    /// recipients stay address-only unless `qualify_recipients` is set.
    pub fn mail(from: &str, mail: email::Email, config: &Config) -> Self {
        let recipient = |addr: &String| {
            if config.qualify_recipients {
                Mailbox::smtp(addr)
            } else {
                Mailbox::address(addr)
            }
        };

        let message = Message {
            item_class: ITEM_CLASS_MESSAGE.to_string(),
            subject: mail.subject,
            body: Body {
                body_type: config.body_type,
                content: mail.body,
            },
            attachments: mail.attachments.into_iter().map(|a| a.into()).collect(),
            sender: Mailbox::smtp(from),
            to_recipients: mail.to.iter().map(recipient).collect(),
            cc_recipients: mail.cc.iter().map(recipient).collect(),
            bcc_recipients: mail.bcc.iter().map(recipient).collect(),
            is_read_receipt_requested: config.request_read_receipt,
            is_delivery_receipt_requested: config.request_delivery_receipt,
        };

        CreateItem {
            message_disposition: MessageDisposition::SendAndSaveCopy,
            saved_item_folder_id: SENT_ITEMS_FOLDER_ID.to_string(),
            items: vec![message],
        }
    }

    /// Serialize to the indented XML document embedded in the SOAP body.
    pub fn to_xml(&self) -> Result<String, Error> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        let mut root = BytesStart::new("m:CreateItem");
        root.push_attribute(("MessageDisposition", self.message_disposition.as_str()));
        writer.write_event(Event::Start(root))?;

        writer.write_event(Event::Start(BytesStart::new("m:SavedItemFolderId")))?;
        let mut folder = BytesStart::new("t:DistinguishedFolderId");
        folder.push_attribute(("Id", self.saved_item_folder_id.as_str()));
        writer.write_event(Event::Empty(folder))?;
        writer.write_event(Event::End(BytesEnd::new("m:SavedItemFolderId")))?;

        writer.write_event(Event::Start(BytesStart::new("m:Items")))?;
        for message in &self.items {
            message.write(&mut writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new("m:Items")))?;

        writer.write_event(Event::End(BytesEnd::new("m:CreateItem")))?;

        String::from_utf8(writer.into_inner()).map_err(|e| Error::Xml(e.to_string()))
    }
}

impl Message {
    fn write(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), Error> {
        writer.write_event(Event::Start(BytesStart::new("t:Message")))?;

        text_element(writer, "t:ItemClass", &self.item_class)?;
        text_element(writer, "t:Subject", &self.subject)?;

        let mut body = BytesStart::new("t:Body");
        body.push_attribute(("BodyType", self.body.body_type.as_str()));
        writer.write_event(Event::Start(body))?;
        writer.write_event(Event::Text(BytesText::new(&self.body.content)))?;
        writer.write_event(Event::End(BytesEnd::new("t:Body")))?;

        writer.write_event(Event::Start(BytesStart::new("t:Attachments")))?;
        for attachment in &self.attachments {
            attachment.write(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new("t:Attachments")))?;

        writer.write_event(Event::Start(BytesStart::new("t:Sender")))?;
        self.sender.write(writer)?;
        writer.write_event(Event::End(BytesEnd::new("t:Sender")))?;

        mailbox_list(writer, "t:ToRecipients", &self.to_recipients)?;
        mailbox_list(writer, "t:CcRecipients", &self.cc_recipients)?;
        mailbox_list(writer, "t:BccRecipients", &self.bcc_recipients)?;

        text_element(
            writer,
            "t:IsReadReceiptRequested",
            bool_str(self.is_read_receipt_requested),
        )?;
        text_element(
            writer,
            "t:IsDeliveryReceiptRequested",
            bool_str(self.is_delivery_receipt_requested),
        )?;

        writer.write_event(Event::End(BytesEnd::new("t:Message")))?;
        Ok(())
    }
}

impl Mailbox {
    fn write(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), Error> {
        writer.write_event(Event::Start(BytesStart::new("t:Mailbox")))?;
        text_element(writer, "t:EmailAddress", &self.email_address)?;
        if let Some(ref routing_type) = self.routing_type {
            text_element(writer, "t:RoutingType", routing_type)?;
        }
        if let Some(ref mailbox_type) = self.mailbox_type {
            text_element(writer, "t:MailboxType", mailbox_type)?;
        }
        writer.write_event(Event::End(BytesEnd::new("t:Mailbox")))?;
        Ok(())
    }
}

impl FileAttachment {
    fn write(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), Error> {
        writer.write_event(Event::Start(BytesStart::new("t:FileAttachment")))?;
        text_element(writer, "t:Name", &self.name)?;
        text_element(writer, "t:ContentId", &self.content_id)?;
        text_element(writer, "t:ContentType", &self.content_type)?;
        text_element(writer, "t:ContentLocation", &self.content_location)?;
        text_element(writer, "t:Size", &self.size.to_string())?;
        text_element(
            writer,
            "t:LastModifiedTime",
            &self
                .last_modified_time
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        )?;
        text_element(writer, "t:IsInline", bool_str(self.is_inline))?;
        text_element(writer, "t:Content", &self.content)?;
        writer.write_event(Event::End(BytesEnd::new("t:FileAttachment")))?;
        Ok(())
    }
}

fn text_element(writer: &mut Writer<Vec<u8>>, tag: &str, value: &str) -> Result<(), Error> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn mailbox_list(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    mailboxes: &[Mailbox],
) -> Result<(), Error> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    for mailbox in mailboxes {
        mailbox.write(writer)?;
    }
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::{Attachment, Email};
    use quick_xml::Reader;

    fn sample_email() -> Email {
        Email {
            to: vec!["a@example.com".to_string(), "b@example.com".to_string()],
            cc: vec!["c@example.com".to_string()],
            bcc: vec![],
            subject: "Weekly report".to_string(),
            body: "<p>All good.</p>".to_string(),
            attachments: vec![],
        }
    }

    fn build(email: Email, config: &Config) -> String {
        CreateItem::mail("sender@example.com", email, config)
            .to_xml()
            .unwrap()
    }

    /// Number of elements (start or empty) with the given name.
    fn count_elements(xml: &str, name: &str) -> usize {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut count = 0;
        loop {
            match reader.read_event().unwrap() {
                Event::Eof => break,
                Event::Start(ref e) | Event::Empty(ref e) => {
                    if e.name().as_ref() == name.as_bytes() {
                        count += 1;
                    }
                }
                _ => {}
            }
        }
        count
    }

    /// Email addresses of the mailboxes under the given recipient list, in
    /// document order.
    fn mailbox_addresses(xml: &str, list_tag: &str) -> Vec<String> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut path: Vec<Vec<u8>> = Vec::new();
        let mut addresses = Vec::new();
        loop {
            match reader.read_event().unwrap() {
                Event::Eof => break,
                Event::Start(e) => path.push(e.name().as_ref().to_vec()),
                Event::End(_) => {
                    path.pop();
                }
                Event::Text(e) => {
                    let tail: Vec<&[u8]> =
                        path.iter().rev().take(3).map(|n| n.as_slice()).collect();
                    if tail
                        == vec![
                            b"t:EmailAddress".as_ref(),
                            b"t:Mailbox".as_ref(),
                            list_tag.as_bytes(),
                        ]
                    {
                        addresses.push(e.unescape().unwrap().into_owned());
                    }
                }
                _ => {}
            }
        }
        addresses
    }

    #[test]
    fn test_request_shape() {
        let config = Config::new("sender@example.com", "token");
        let xml = build(sample_email(), &config);

        assert_eq!(count_elements(&xml, "m:CreateItem"), 1);
        assert!(xml.starts_with("<m:CreateItem MessageDisposition=\"SendAndSaveCopy\">"));
        assert!(xml.contains("<t:DistinguishedFolderId Id=\"sentitems\"/>"));
        assert!(xml.contains("<t:ItemClass>IPM.Note</t:ItemClass>"));
        assert_eq!(count_elements(&xml, "t:Message"), 1);
    }

    #[test]
    fn test_recipients_preserved_in_order() {
        let config = Config::new("sender@example.com", "token");
        let xml = build(sample_email(), &config);

        assert_eq!(
            mailbox_addresses(&xml, "t:ToRecipients"),
            vec!["a@example.com", "b@example.com"]
        );
        assert_eq!(mailbox_addresses(&xml, "t:CcRecipients"), vec!["c@example.com"]);
        assert!(mailbox_addresses(&xml, "t:BccRecipients").is_empty());
    }

    #[test]
    fn test_receipt_flags() {
        let mut config = Config::new("sender@example.com", "token");
        let xml = build(sample_email(), &config);
        assert!(xml.contains("<t:IsReadReceiptRequested>false</t:IsReadReceiptRequested>"));
        assert!(xml.contains("<t:IsDeliveryReceiptRequested>false</t:IsDeliveryReceiptRequested>"));

        config.request_read_receipt = true;
        let xml = build(sample_email(), &config);
        assert!(xml.contains("<t:IsReadReceiptRequested>true</t:IsReadReceiptRequested>"));
        assert!(xml.contains("<t:IsDeliveryReceiptRequested>false</t:IsDeliveryReceiptRequested>"));
    }

    #[test]
    fn test_body_type_attribute() {
        let mut config = Config::new("sender@example.com", "token");
        let xml = build(sample_email(), &config);
        assert!(xml.contains("<t:Body BodyType=\"HTML\">"));

        config.body_type = BodyType::Text;
        let xml = build(sample_email(), &config);
        assert!(xml.contains("<t:Body BodyType=\"Text\">"));
    }

    #[test]
    fn test_sender_qualified_recipients_bare() {
        let config = Config::new("sender@example.com", "token");
        let xml = build(sample_email(), &config);

        // Only the sender mailbox carries routing/mailbox type fields
        assert_eq!(count_elements(&xml, "t:RoutingType"), 1);
        assert_eq!(count_elements(&xml, "t:MailboxType"), 1);
        assert!(xml.contains("<t:RoutingType>SMTP</t:RoutingType>"));
        assert!(xml.contains("<t:MailboxType>Mailbox</t:MailboxType>"));
    }

    #[test]
    fn test_qualify_recipients() {
        let mut config = Config::new("sender@example.com", "token");
        config.qualify_recipients = true;
        let xml = build(sample_email(), &config);

        // Sender plus three recipients
        assert_eq!(count_elements(&xml, "t:RoutingType"), 4);
        assert_eq!(count_elements(&xml, "t:MailboxType"), 4);
    }

    #[test]
    fn test_attachments_preserved_in_order() {
        let config = Config::new("sender@example.com", "token");
        let mut email = sample_email();
        email.attachments = vec![
            Attachment {
                name: "first.txt".to_string(),
                data: b"first".to_vec(),
                ..Default::default()
            },
            Attachment {
                name: "second.png".to_string(),
                data: b"second".to_vec(),
                content_type: Some("image/png".to_string()),
                ..Default::default()
            },
        ];
        let xml = build(email, &config);

        assert_eq!(count_elements(&xml, "t:FileAttachment"), 2);
        let first = xml.find("<t:Name>first.txt</t:Name>").unwrap();
        let second = xml.find("<t:Name>second.png</t:Name>").unwrap();
        assert!(first < second);
        assert!(xml.contains(&format!("<t:Content>{}</t:Content>", base64::encode(b"first"))));
        assert!(xml.contains("<t:ContentType>image/png</t:ContentType>"));
    }

    #[test]
    fn test_attachment_conversion() {
        let attachment = Attachment {
            name: "notes.txt".to_string(),
            data: b"hello".to_vec(),
            ..Default::default()
        };
        let wire: FileAttachment = attachment.into();

        assert_eq!(wire.content, base64::encode(b"hello"));
        assert_eq!(wire.size, 5);
        assert_eq!(wire.content_type, DEFAULT_ATTACHMENT_CONTENT_TYPE);
        assert_eq!(wire.content_id, "");
        assert!(!wire.is_inline);
    }

    #[test]
    fn test_text_is_escaped() {
        let config = Config::new("sender@example.com", "token");
        let mut email = sample_email();
        email.subject = "Q&A <draft>".to_string();
        let xml = build(email, &config);

        assert!(xml.contains("Q&amp;A &lt;draft&gt;"));
        // Still parses end to end
        assert_eq!(count_elements(&xml, "t:Subject"), 1);
    }
}
